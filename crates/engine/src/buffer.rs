//! In-memory request buffer
//!
//! FIFO queue of admitted operations, each with its cached size and
//! admission time. The buffer tracks the byte total of its contents; every
//! mutation keeps `total_bytes == sum(entry.size)`.

use esink_core::Operation;
use esink_durability::OperationSerializer;
use std::collections::VecDeque;
use tokio::time::Instant;

/// One buffered operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEntry {
    /// The operation itself
    pub operation: Operation,
    /// Cached `OperationSerializer::size` of the operation
    pub size: u64,
    /// When the operation was admitted (or restored)
    pub admitted_at: Instant,
}

impl BufferedEntry {
    /// Wrap an operation, computing its size
    pub fn new(operation: Operation, admitted_at: Instant) -> Self {
        let size = OperationSerializer::size(&operation);
        Self {
            operation,
            size,
            admitted_at,
        }
    }
}

/// Ordered queue of admitted-but-unacknowledged operations
#[derive(Debug, Default)]
pub struct RequestBuffer {
    entries: VecDeque<BufferedEntry>,
    total_bytes: u64,
}

impl RequestBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the cached sizes of all buffered operations
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Append an entry at the back
    pub fn push_back(&mut self, entry: BufferedEntry) {
        self.total_bytes += entry.size;
        self.entries.push_back(entry);
    }

    /// Put entries back at the front, keeping their relative order
    pub fn requeue_front(&mut self, entries: Vec<BufferedEntry>) {
        for entry in entries.into_iter().rev() {
            self.total_bytes += entry.size;
            self.entries.push_front(entry);
        }
    }

    /// Remove the longest prefix within both limits.
    ///
    /// Stops at whichever of `max_count` or `max_bytes` binds first, but
    /// always takes at least one entry from a non-empty buffer so an
    /// oversized restored operation cannot wedge the queue.
    pub fn drain_batch(&mut self, max_count: usize, max_bytes: u64) -> Vec<BufferedEntry> {
        let mut count = 0;
        let mut bytes = 0u64;
        for entry in &self.entries {
            if count >= max_count {
                break;
            }
            if count > 0 && bytes + entry.size > max_bytes {
                break;
            }
            count += 1;
            bytes += entry.size;
        }
        self.total_bytes -= bytes;
        self.entries.drain(..count).collect()
    }

    /// Admission time of the front entry
    ///
    /// Requeued entries keep their original admission time, so the front is
    /// the oldest entry in practice but not strictly.
    pub fn oldest_admitted_at(&self) -> Option<Instant> {
        self.entries.front().map(|entry| entry.admitted_at)
    }

    /// Buffered operations in order
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter().map(|entry| &entry.operation)
    }

    /// Buffered entries in order
    pub fn iter(&self) -> impl Iterator<Item = &BufferedEntry> {
        self.entries.iter()
    }

    /// True if the tracked total matches the entries
    pub fn check_invariant(&self) -> bool {
        self.entries.iter().map(|entry| entry.size).sum::<u64>() == self.total_bytes
    }
}
