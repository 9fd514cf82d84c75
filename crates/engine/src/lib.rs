//! Bulk write engine for esink
//!
//! This crate drives delivery of operations to a remote bulk API:
//! - BulkSinkWriter: caller handle with write, flush, snapshot and close
//! - Writer event loop: buffering, flush triggers, in-flight accounting
//! - Reconciliation of per-item results, requeue and retry backoff
//! - FatalExceptionClassifier: retryable vs fatal failures
//! - BulkApiBridge: capability interface to a concrete store client
//!
//! The engine is the only component that knows about:
//! - When batches are cut and dispatched
//! - Which failures are retried and which halt the pipeline

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod writer;

pub use bridge::{BulkApiBridge, BulkResponse, ItemResult};
pub use buffer::{BufferedEntry, RequestBuffer};
pub use classifier::{Classification, FatalError, FatalExceptionClassifier};
pub use config::{ConfigError, SinkConfig, CONFIG_FILE_NAME};
pub use error::{Result, SinkError};
pub use stats::WriterStats;
pub use writer::{BulkSinkWriter, BulkSinkWriterBuilder};
