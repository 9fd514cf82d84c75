//! Scripted in-memory bridge for tests
//!
//! [`ScriptedBridge`] records every submitted batch and answers with queued
//! [`ScriptedOutcome`]s, acknowledging everything once the script runs out.
//! Submissions can be held at a gate to keep batches in flight.

use crate::bridge::{BulkApiBridge, BulkResponse, ItemResult};
use crate::classifier::{Classification, FatalExceptionClassifier};
use async_trait::async_trait;
use esink_core::{Operation, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// Scripted answer to one batch
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Acknowledge every item
    Success,
    /// Fail the listed item positions, acknowledge the rest
    PartialFailure(Vec<(usize, TransportError)>),
    /// Fail the whole request
    Fail(TransportError),
    /// Answer with this many successful items, whatever the batch size
    Items(usize),
}

impl ScriptedOutcome {
    /// Reject the listed item positions with a generic item error
    pub fn rejected(positions: impl IntoIterator<Item = usize>) -> Self {
        ScriptedOutcome::PartialFailure(
            positions
                .into_iter()
                .map(|i| (i, TransportError::rejected(format!("item {} rejected", i))))
                .collect(),
        )
    }
}

/// Client handed out by [`ScriptedBridge`]
#[derive(Debug)]
pub struct ScriptedClient {
    /// Sequence number of the `create_client` call that made it
    pub id: usize,
}

struct Inner {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    batches: Mutex<Vec<Vec<Operation>>>,
    submitted: Notify,
    held: AtomicBool,
    gate: Semaphore,
    latency: Mutex<Duration>,
    took: Mutex<Duration>,
    connect_error: Mutex<Option<TransportError>>,
    verify_error: Mutex<Option<TransportError>>,
    classifier: Mutex<Option<Arc<FatalExceptionClassifier>>>,
    clients_created: AtomicUsize,
    cleaned_up: AtomicBool,
}

/// Bridge answering from a script. Clones share the same script and log.
#[derive(Clone)]
pub struct ScriptedBridge {
    inner: Arc<Inner>,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBridge {
    /// A bridge that acknowledges everything
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                outcomes: Mutex::new(VecDeque::new()),
                batches: Mutex::new(Vec::new()),
                submitted: Notify::new(),
                held: AtomicBool::new(false),
                gate: Semaphore::new(0),
                latency: Mutex::new(Duration::ZERO),
                took: Mutex::new(Duration::from_millis(1)),
                connect_error: Mutex::new(None),
                verify_error: Mutex::new(None),
                classifier: Mutex::new(None),
                clients_created: AtomicUsize::new(0),
                cleaned_up: AtomicBool::new(false),
            }),
        }
    }

    /// Queue the answer for the next unanswered batch
    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.inner.outcomes.lock().push_back(outcome);
    }

    /// Queue several answers in order
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.inner.outcomes.lock().extend(outcomes);
    }

    /// Hold submissions at the gate until released
    pub fn hold(&self) {
        self.inner.held.store(true, Ordering::SeqCst);
    }

    /// Let `count` held submissions through
    pub fn release(&self, count: usize) {
        self.inner.gate.add_permits(count);
    }

    /// Stop holding; submissions already waiting still need `release`
    pub fn unhold(&self) {
        self.inner.held.store(false, Ordering::SeqCst);
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// `took` reported in responses
    pub fn set_took(&self, took: Duration) {
        *self.inner.took.lock() = took;
    }

    /// Make `create_client` fail
    pub fn fail_connect(&self, err: TransportError) {
        *self.inner.connect_error.lock() = Some(err);
    }

    /// Make `verify_client_connection` fail
    pub fn fail_verify(&self, err: TransportError) {
        *self.inner.verify_error.lock() = Some(err);
    }

    /// Classify failures with `classifier` instead of the default chain
    pub fn set_classifier(&self, classifier: FatalExceptionClassifier) {
        *self.inner.classifier.lock() = Some(Arc::new(classifier));
    }

    /// Every submitted batch, in submission order
    pub fn batches(&self) -> Vec<Vec<Operation>> {
        self.inner.batches.lock().clone()
    }

    /// Number of submitted batches
    pub fn batch_count(&self) -> usize {
        self.inner.batches.lock().len()
    }

    /// Targets of every submitted batch
    pub fn batch_targets(&self) -> Vec<Vec<String>> {
        self.inner
            .batches
            .lock()
            .iter()
            .map(|batch| batch.iter().map(|op| op.target().to_string()).collect())
            .collect()
    }

    /// Wait until at least `count` batches were submitted
    pub async fn wait_for_batches(&self, count: usize) -> Vec<Vec<Operation>> {
        loop {
            let notified = self.inner.submitted.notified();
            if self.batch_count() >= count {
                return self.batches();
            }
            notified.await;
        }
    }

    /// Number of `create_client` calls
    pub fn clients_created(&self) -> usize {
        self.inner.clients_created.load(Ordering::SeqCst)
    }

    /// True once `cleanup` ran
    pub fn cleaned_up(&self) -> bool {
        self.inner.cleaned_up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkApiBridge for ScriptedBridge {
    type Client = ScriptedClient;

    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_client(&self) -> Result<ScriptedClient, TransportError> {
        if let Some(err) = self.inner.connect_error.lock().clone() {
            return Err(err);
        }
        let id = self.inner.clients_created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedClient { id })
    }

    async fn verify_client_connection(&self, _client: &ScriptedClient) -> Result<(), TransportError> {
        match self.inner.verify_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn submit_batch(
        &self,
        _client: &ScriptedClient,
        batch: &[Operation],
    ) -> Result<BulkResponse, TransportError> {
        let outcome = {
            let mut batches = self.inner.batches.lock();
            batches.push(batch.to_vec());
            self.inner
                .outcomes
                .lock()
                .pop_front()
                .unwrap_or(ScriptedOutcome::Success)
        };
        self.inner.submitted.notify_waiters();

        if self.inner.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.inner.gate.acquire().await {
                permit.forget();
            }
        }
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let took = *self.inner.took.lock();
        match outcome {
            ScriptedOutcome::Success => Ok(BulkResponse::success(batch.len(), took)),
            ScriptedOutcome::Items(count) => Ok(BulkResponse::success(count, took)),
            ScriptedOutcome::Fail(err) => Err(err),
            ScriptedOutcome::PartialFailure(failures) => {
                let mut response = BulkResponse::success(batch.len(), took);
                for (position, err) in failures {
                    if let Some(item) = response.items.get_mut(position) {
                        *item = ItemResult::Failed(err);
                    }
                }
                Ok(response)
            }
        }
    }

    fn classify_failure(&self, error: &TransportError) -> Classification {
        match self.inner.classifier.lock().as_ref() {
            Some(classifier) => classifier.classify(error),
            None => FatalExceptionClassifier::elasticsearch_default().classify(error),
        }
    }

    async fn cleanup(&self, _client: &ScriptedClient) {
        self.inner.cleaned_up.store(true, Ordering::SeqCst);
    }
}
