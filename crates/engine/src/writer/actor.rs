//! Writer event loop
//!
//! One task owns the [`WriterState`]. Caller requests arrive as
//! [`Command`]s, batch outcomes arrive as [`Completion`]s posted by the
//! submit tasks, and a single deadline drives time-based flushes. Nothing
//! else touches the state, so admit, drain, requeue and snapshot never
//! interleave.

use super::state::{BatchId, BatchOutcome, Resolution, WriterState};
use crate::bridge::BulkApiBridge;
use crate::error::{Result, SinkError};
use crate::stats::WriterStats;
use esink_core::Operation;
use esink_durability::BufferedRequestState;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Request sent from a writer handle to its event loop
pub(crate) enum Command {
    Write {
        operation: Operation,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<BufferedRequestState>>,
    },
    Stats {
        reply: oneshot::Sender<WriterStats>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Outcome of a submit task, posted back into the loop
pub(crate) struct Completion {
    id: BatchId,
    outcome: BatchOutcome,
}

pub(crate) struct WriterActor<B: BulkApiBridge> {
    state: WriterState,
    bridge: Arc<B>,
    client: Arc<B::Client>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    flush_waiters: Vec<oneshot::Sender<Result<()>>>,
    close_waiter: Option<oneshot::Sender<Result<()>>>,
}

impl<B: BulkApiBridge> WriterActor<B> {
    pub(crate) fn new(
        state: WriterState,
        bridge: Arc<B>,
        client: B::Client,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            state,
            bridge,
            client: Arc::new(client),
            commands,
            completions_tx,
            completions_rx,
            flush_waiters: Vec::new(),
            close_waiter: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let now = Instant::now();
            self.dispatch_ready(now);
            self.settle_waiters();
            if self.close_waiter.is_some() && self.close_complete() {
                break;
            }

            let deadline = self.state.next_deadline(now);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        let pending = self.state.stats().pending_requests();
                        if pending > 0 {
                            warn!(pending, "writer handle dropped without close, abandoning pending operations");
                        }
                        break;
                    }
                },
                Some(completion) = self.completions_rx.recv() => self.handle_completion(completion),
                _ = wait_for(deadline) => {}
            }
        }

        self.bridge.cleanup(&self.client).await;
        if let Some(reply) = self.close_waiter.take() {
            let result = match self.state.fatal() {
                Some(fatal) => Err(SinkError::FatalTransport(fatal.clone())),
                None => Ok(()),
            };
            let _ = reply.send(result);
        }
        info!(bridge = self.bridge.name(), "writer closed");
    }

    fn closing(&self) -> bool {
        self.close_waiter.is_some()
    }

    fn close_complete(&self) -> bool {
        self.state.fatal().is_some() || self.state.is_drained()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Write { operation, reply } => {
                let result = if self.closing() {
                    Err(SinkError::Closed)
                } else {
                    self.state.admit(operation, Instant::now())
                };
                let _ = reply.send(result);
            }
            Command::Flush { reply } => self.flush_waiters.push(reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.state.stats());
            }
            Command::Close { reply } => {
                if self.closing() {
                    let _ = reply.send(Err(SinkError::Closed));
                } else {
                    debug!("close requested, draining writer");
                    self.close_waiter = Some(reply);
                }
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion { id, outcome } = completion;
        let bridge = &self.bridge;
        let resolution = self
            .state
            .resolve(id, outcome, Instant::now(), |err| bridge.classify_failure(err));
        if let Resolution::Settled { acknowledged, requeued } = resolution {
            debug!(batch = id, acknowledged, requeued, "batch resolved");
        }
    }

    /// Dispatch every batch the triggers allow right now
    fn dispatch_ready(&mut self, now: Instant) {
        // A flush that timed out has dropped its receiver and no longer forces
        self.flush_waiters.retain(|waiter| !waiter.is_closed());
        let force = self.closing() || !self.flush_waiters.is_empty();
        while let Some((id, batch)) = self.state.next_batch(now, force) {
            debug!(
                batch = id,
                operations = batch.len(),
                bridge = self.bridge.name(),
                "dispatching bulk request"
            );
            let bridge = Arc::clone(&self.bridge);
            let client = Arc::clone(&self.client);
            let completions = self.completions_tx.clone();
            tokio::spawn(async move {
                let outcome = match bridge.submit_batch(&client, &batch).await {
                    Ok(response) => BatchOutcome::Response(response),
                    Err(err) => BatchOutcome::Failed(err),
                };
                // The loop may already be gone after a drop without close
                let _ = completions.send(Completion { id, outcome });
            });
        }
    }

    /// Answer flush waiters once the writer is drained or has halted
    fn settle_waiters(&mut self) {
        if self.flush_waiters.is_empty() {
            return;
        }
        let result = match self.state.fatal() {
            Some(fatal) => Err(SinkError::FatalTransport(fatal.clone())),
            None if self.state.is_drained() => Ok(()),
            None => return,
        };
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
