//! Capability interface to the remote bulk API
//!
//! The writer never touches a concrete store client. Each target store
//! version implements [`BulkApiBridge`] once; the writer creates a client
//! through it on open, submits batches through it, lets it classify failures
//! and hands the client back to it on close.

use crate::classifier::{Classification, FatalExceptionClassifier};
use async_trait::async_trait;
use esink_core::{Operation, TransportError};
use std::time::Duration;

/// Result for one operation of a submitted batch
#[derive(Debug, Clone)]
pub enum ItemResult {
    /// The store acknowledged the operation
    Success,
    /// The store rejected the operation
    Failed(TransportError),
}

impl ItemResult {
    /// True for [`ItemResult::Failed`]
    pub fn is_failure(&self) -> bool {
        matches!(self, ItemResult::Failed(_))
    }
}

/// Response to a bulk request that reached the store
///
/// `items` is positional: entry `i` is the result of operation `i` of the
/// submitted batch.
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    /// Per-item results in submission order
    pub items: Vec<ItemResult>,
    /// Time the store spent on the request
    pub took: Duration,
}

impl BulkResponse {
    /// A response acknowledging `count` items
    pub fn success(count: usize, took: Duration) -> Self {
        Self {
            items: vec![ItemResult::Success; count],
            took,
        }
    }

    /// True if any item failed
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(ItemResult::is_failure)
    }

    /// Number of failed items
    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_failure()).count()
    }
}

/// Bridge between the writer and one store's bulk API.
///
/// Implementations must be cheap to share: the writer holds the bridge and
/// its client behind `Arc`s and calls `submit_batch` concurrently, up to
/// `max_in_flight_requests` times.
#[async_trait]
pub trait BulkApiBridge: Send + Sync + 'static {
    /// Store client created once per writer
    type Client: Send + Sync + 'static;

    /// Short name used in logs
    fn name(&self) -> &str;

    /// Create the client used for every request of this writer
    async fn create_client(&self) -> Result<Self::Client, TransportError>;

    /// Check that the store is reachable before accepting writes
    async fn verify_client_connection(&self, _client: &Self::Client) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send one batch.
    ///
    /// `Err` means the request as a whole failed; `Ok` carries one result
    /// per operation.
    async fn submit_batch(
        &self,
        client: &Self::Client,
        batch: &[Operation],
    ) -> Result<BulkResponse, TransportError>;

    /// Decide whether a failure halts the pipeline
    fn classify_failure(&self, error: &TransportError) -> Classification {
        FatalExceptionClassifier::elasticsearch_default().classify(error)
    }

    /// Release the client when the writer closes
    async fn cleanup(&self, _client: &Self::Client) {}
}
