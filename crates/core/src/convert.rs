//! Record to operation conversion
//!
//! The sink is generic over the caller's record type. An [`ElementConverter`]
//! turns each record into an [`Operation`] at admission time. Conversion is a
//! pure function of the record and a stable [`SinkContext`]; it must not do
//! I/O.

use crate::operation::{Operation, OperationKind};
use crate::types::WriterId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable context handed to converters
///
/// Holds the writer identity and a monotonically increasing sequence that
/// converters may use to mint correlation ids.
#[derive(Debug)]
pub struct SinkContext {
    writer_id: WriterId,
    subtask_index: u32,
    sequence: AtomicU64,
}

impl SinkContext {
    /// Create a context for the given parallel subtask
    pub fn new(subtask_index: u32) -> Self {
        Self {
            writer_id: WriterId::new(),
            subtask_index,
            sequence: AtomicU64::new(0),
        }
    }

    /// Identity of the writer owning this context
    pub fn writer_id(&self) -> WriterId {
        self.writer_id
    }

    /// Index of the parallel subtask this writer runs as
    pub fn subtask_index(&self) -> u32 {
        self.subtask_index
    }

    /// Next value of the per-writer sequence, starting at 0
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SinkContext {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Converts caller records into bulk operations
pub trait ElementConverter<R>: Send + Sync {
    /// Map one record to the operation that will be buffered for it
    fn convert(&self, record: R, context: &SinkContext) -> Operation;
}

type ConvertFn<R> = Box<dyn Fn(R, &SinkContext) -> Operation + Send + Sync>;

/// Closure-backed converter
///
/// Optionally stamps a conflict retry count onto every update it produces,
/// so callers do not have to repeat it in each closure.
///
/// ```ignore
/// let converter = OperationConverter::new(|user: User, _ctx| {
///     Operation::update(format!("users/{}", user.id), user.to_json())
/// })
/// .with_retry_on_conflict(3);
/// ```
pub struct OperationConverter<R> {
    convert: ConvertFn<R>,
    retry_on_conflict: Option<i32>,
}

impl<R> OperationConverter<R> {
    /// Wrap a conversion closure
    pub fn new<F>(convert: F) -> Self
    where
        F: Fn(R, &SinkContext) -> Operation + Send + Sync + 'static,
    {
        Self {
            convert: Box::new(convert),
            retry_on_conflict: None,
        }
    }

    /// Apply `retries` to every produced update operation
    pub fn with_retry_on_conflict(mut self, retries: i32) -> Self {
        self.retry_on_conflict = Some(retries);
        self
    }
}

impl<R> ElementConverter<R> for OperationConverter<R> {
    fn convert(&self, record: R, context: &SinkContext) -> Operation {
        let operation = (self.convert)(record, context);
        match self.retry_on_conflict {
            Some(retries) if operation.kind() == OperationKind::Update => {
                operation.with_retry_on_conflict(retries)
            }
            _ => operation,
        }
    }
}

impl<R> std::fmt::Debug for OperationConverter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationConverter")
            .field("retry_on_conflict", &self.retry_on_conflict)
            .finish()
    }
}
