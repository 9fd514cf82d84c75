//! Byte formats for checkpointed sink state.
//!
//! This module centralizes all serialization of buffered work. Keeping it
//! apart from the writer makes format evolution easier to manage: the
//! writer only ever sees [`Operation`](esink_core::Operation)s and
//! [`BufferedRequestState`]s.
//!
//! # Module Structure
//!
//! - `operation`: single operation encoding and size accounting
//! - `buffered_state`: versioned checkpoint envelope around many operations

pub mod buffered_state;
pub mod operation;

pub use buffered_state::{
    BufferedRequestState, BufferedStateSerializer, BUFFERED_STATE_FORMAT_VERSION,
    BUFFERED_STATE_MAGIC,
};
pub use operation::OperationSerializer;

use std::io;

/// Errors raised while decoding checkpointed state.
///
/// Every variant means the bytes cannot be trusted; callers must surface it
/// rather than resume with partial state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Input ended before a complete value was read
    #[error("Insufficient data to decode")]
    InsufficientData,

    /// Structurally invalid input
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Leading magic bytes do not identify a buffered state
    #[error("Bad magic bytes: {0:02x?}")]
    BadMagic([u8; 4]),

    /// Format version this build cannot read
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the input
        expected: u32,
        /// Checksum computed over the input
        computed: u32,
    },

    /// Operation kind tag is not known
    #[error("Unknown operation kind tag: {0:#04x}")]
    UnknownOperationKind(u8),

    /// Target identifier is not valid UTF-8
    #[error("Operation target is not valid UTF-8")]
    InvalidUtf8,

    /// Recorded byte total disagrees with the decoded operations
    #[error("State size mismatch: recorded {recorded} bytes, computed {computed} bytes")]
    SizeMismatch {
        /// Byte total stored in the input
        recorded: u64,
        /// Byte total of the decoded operations
        computed: u64,
    },

    /// Underlying reader or writer failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for FormatError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => FormatError::InsufficientData,
            _ => FormatError::Io(e.to_string()),
        }
    }
}
