//! Error types for the bulk writer
//!
//! Every fallible writer operation returns [`SinkError`]. Callers usually only
//! need to distinguish retryable admission failures (`BufferFull`) from fatal
//! ones; [`SinkError::is_fatal`] does that.

use crate::classifier::FatalError;
use crate::config::ConfigError;
use esink_core::TransportError;
use esink_durability::FormatError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for writer operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Errors raised by the bulk writer
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// A single operation exceeds `max_record_size_in_bytes`
    #[error("record of {size} bytes exceeds the maximum record size of {max} bytes")]
    RecordTooLarge {
        /// Size of the rejected operation
        size: u64,
        /// Configured limit
        max: u64,
    },

    /// The buffer already holds `max_buffered_requests` operations
    #[error("buffer full: {capacity} operations already buffered")]
    BufferFull {
        /// Configured capacity
        capacity: usize,
    },

    /// A restored checkpoint could not be decoded
    #[error("corrupt checkpoint state: {0}")]
    CorruptState(#[from] FormatError),

    /// The transport raised a fatal failure; the pipeline has halted
    #[error(transparent)]
    FatalTransport(#[from] FatalError),

    /// Connecting to the remote store failed with a retryable error
    #[error("failed to connect: {0}")]
    Connect(TransportError),

    /// A full flush did not complete in time; buffered work may be lost
    #[error("flush did not complete within {0:?}")]
    FlushTimeout(Duration),

    /// The writer was closed or its event loop has exited
    #[error("writer is closed")]
    Closed,

    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl SinkError {
    /// True if the writer cannot make progress after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SinkError::FatalTransport(_)
                | SinkError::CorruptState(_)
                | SinkError::FlushTimeout(_)
                | SinkError::Closed
        )
    }

    /// True if the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::BufferFull { .. } | SinkError::Connect(_))
    }
}
