//! Durability layer for esink
//!
//! This crate handles everything that survives a restart:
//!
//! - Operation encoding and size accounting
//! - Buffered state snapshots taken at checkpoints
//! - Versioned, checksummed on-disk layout for those snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod format; // Byte formats for operations and checkpointed state

pub use format::{
    BufferedRequestState, BufferedStateSerializer, FormatError, OperationSerializer,
    BUFFERED_STATE_FORMAT_VERSION, BUFFERED_STATE_MAGIC,
};
