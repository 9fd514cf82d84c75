//! Bulk operations submitted to the remote store
//!
//! An [`Operation`] is the unit of work the sink buffers, batches and ships.
//! It mirrors a single action line of a bulk request:
//!
//! - **Index**: create or replace the target document
//! - **Create**: create the target document, fail if it exists
//! - **Update**: partial update (or upsert) of the target document
//! - **Delete**: remove the target document
//!
//! Operations are immutable once built. The buffer owns each one until the
//! store acknowledges it or a retryable failure puts it back in the queue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of bulk action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Create or replace a document
    Index,
    /// Create a document, rejected by the store if it already exists
    Create,
    /// Partially update a document
    Update,
    /// Delete a document
    Delete,
}

impl OperationKind {
    /// All kinds, in tag order
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Index,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    /// Stable one-byte tag used by the checkpoint format
    pub fn to_byte(self) -> u8 {
        match self {
            OperationKind::Index => 0x01,
            OperationKind::Create => 0x02,
            OperationKind::Update => 0x03,
            OperationKind::Delete => 0x04,
        }
    }

    /// Parse a tag written by [`OperationKind::to_byte`]
    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(OperationKind::Index),
            0x02 => Some(OperationKind::Create),
            0x03 => Some(OperationKind::Update),
            0x04 => Some(OperationKind::Delete),
            _ => None,
        }
    }

    /// Action name as it appears in a bulk request body
    pub fn action_name(self) -> &'static str {
        match self {
            OperationKind::Index => "index",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_name())
    }
}

/// A single bulk operation
///
/// `target` identifies the document inside the store (typically
/// `index/id`). `payload` is the already-serialized document or update body;
/// deletes normally carry none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    kind: OperationKind,
    target: String,
    payload: Option<Vec<u8>>,
    retry_on_conflict: i32,
}

impl Operation {
    /// Build an operation of any kind
    pub fn new(kind: OperationKind, target: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        Self {
            kind,
            target: target.into(),
            payload,
            retry_on_conflict: 0,
        }
    }

    /// Index (create or replace) `payload` at `target`
    pub fn index(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OperationKind::Index, target, Some(payload.into()))
    }

    /// Create `payload` at `target`
    pub fn create(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OperationKind::Create, target, Some(payload.into()))
    }

    /// Apply the update body `payload` to `target`
    pub fn update(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(OperationKind::Update, target, Some(payload.into()))
    }

    /// Delete `target`
    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, target, None)
    }

    /// Return a copy with the given conflict retry count
    ///
    /// The store retries a conflicting update this many times before
    /// reporting a version conflict for the item.
    pub fn with_retry_on_conflict(mut self, retries: i32) -> Self {
        self.retry_on_conflict = retries;
        self
    }

    /// Kind of this operation
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Target document identifier
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Serialized payload, if any
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Payload length in bytes (0 when absent)
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }

    /// Conflict retry count
    pub fn retry_on_conflict(&self) -> i32 {
        self.retry_on_conflict
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} payload bytes)",
            self.kind,
            self.target,
            self.payload_len()
        )
    }
}
