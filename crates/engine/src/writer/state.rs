//! Writer state machine
//!
//! Everything the event loop mutates lives in [`WriterState`]: the buffer,
//! the in-flight batches, the retry backoff and the fatal latch. The state is
//! synchronous and takes the current time as an argument, so the flush
//! triggers and reconciliation rules are testable without a runtime.

use crate::buffer::{BufferedEntry, RequestBuffer};
use crate::bridge::{BulkResponse, ItemResult};
use crate::classifier::{Classification, FatalError};
use crate::config::SinkConfig;
use crate::error::{Result, SinkError};
use crate::stats::WriterStats;
use esink_core::{Operation, TransportError};
use esink_durability::BufferedRequestState;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Identifier of a dispatched batch, unique per writer
pub(crate) type BatchId = u64;

/// How a dispatched batch came back
#[derive(Debug)]
pub(crate) enum BatchOutcome {
    /// The store answered, possibly with item failures
    Response(BulkResponse),
    /// The request failed as a whole
    Failed(TransportError),
}

/// What reconciling a batch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Some operations were acknowledged, the rest requeued
    Settled { acknowledged: usize, requeued: usize },
    /// A fatal failure halted the writer
    Halted,
    /// The batch id was not in flight, or the writer had already halted
    Ignored,
}

pub(crate) struct WriterState {
    config: SinkConfig,
    buffer: RequestBuffer,
    in_flight: BTreeMap<BatchId, Vec<BufferedEntry>>,
    next_batch_id: BatchId,
    retry_not_before: Option<Instant>,
    fatal: Option<FatalError>,
    records_admitted: u64,
    records_acknowledged: u64,
    records_requeued: u64,
    batches_dispatched: u64,
    batches_failed: u64,
    last_request_took: Option<Duration>,
}

impl WriterState {
    pub(crate) fn new(config: SinkConfig) -> Self {
        Self {
            config,
            buffer: RequestBuffer::new(),
            in_flight: BTreeMap::new(),
            next_batch_id: 0,
            retry_not_before: None,
            fatal: None,
            records_admitted: 0,
            records_acknowledged: 0,
            records_requeued: 0,
            batches_dispatched: 0,
            batches_failed: 0,
            last_request_took: None,
        }
    }

    /// Seed the buffer from checkpointed states, in order.
    ///
    /// Restored operations count as admitted now. They may exceed the buffer
    /// capacity; new admissions then fail until the backlog drains.
    pub(crate) fn restore(&mut self, states: Vec<BufferedRequestState>, now: Instant) -> usize {
        let mut restored = 0;
        for state in states {
            for operation in state.into_operations() {
                self.buffer.push_back(BufferedEntry::new(operation, now));
                restored += 1;
            }
        }
        if self.buffer.len() > self.config.max_buffered_requests {
            warn!(
                buffered = self.buffer.len(),
                capacity = self.config.max_buffered_requests,
                "restored state exceeds buffer capacity"
            );
        }
        debug_assert!(self.buffer.check_invariant());
        restored
    }

    /// Admit one operation.
    ///
    /// Oversized operations are rejected before capacity is checked. Capacity
    /// counts in-flight operations too, so a failed batch always fits back
    /// into the buffer. A rejected operation leaves the buffer untouched.
    pub(crate) fn admit(&mut self, operation: Operation, now: Instant) -> Result<()> {
        if let Some(fatal) = &self.fatal {
            return Err(SinkError::FatalTransport(fatal.clone()));
        }
        let entry = BufferedEntry::new(operation, now);
        if entry.size > self.config.max_record_size_in_bytes {
            return Err(SinkError::RecordTooLarge {
                size: entry.size,
                max: self.config.max_record_size_in_bytes,
            });
        }
        if self.buffer.len() + self.in_flight_operations() >= self.config.max_buffered_requests {
            return Err(SinkError::BufferFull {
                capacity: self.config.max_buffered_requests,
            });
        }
        self.buffer.push_back(entry);
        self.records_admitted += 1;
        debug_assert!(self.buffer.check_invariant());
        Ok(())
    }

    fn in_flight_operations(&self) -> usize {
        self.in_flight.values().map(Vec::len).sum()
    }

    /// True if a batch may be dispatched at `now`
    fn can_dispatch(&self, now: Instant) -> bool {
        self.fatal.is_none()
            && !self.buffer.is_empty()
            && self.in_flight.len() < self.config.max_in_flight_requests
            && self.retry_not_before.map_or(true, |at| now >= at)
    }

    /// True if a count, byte or age threshold has been reached
    fn threshold_reached(&self, now: Instant) -> bool {
        self.buffer.len() >= self.config.max_batch_size
            || self.buffer.total_bytes() >= self.config.max_batch_size_in_bytes
            || self
                .buffer
                .oldest_admitted_at()
                .map_or(false, |at| now.saturating_duration_since(at) >= self.config.max_time_in_buffer())
    }

    /// Drain the next batch if one should be dispatched.
    ///
    /// `force` skips the thresholds (used while flushing everything); the
    /// in-flight ceiling and retry backoff still apply.
    pub(crate) fn next_batch(&mut self, now: Instant, force: bool) -> Option<(BatchId, Vec<Operation>)> {
        if !self.can_dispatch(now) || !(force || self.threshold_reached(now)) {
            return None;
        }
        self.retry_not_before = None;

        let entries = self.buffer.drain_batch(
            self.config.max_batch_size,
            self.config.max_batch_size_in_bytes,
        );
        debug_assert!(self.buffer.check_invariant());

        let id = self.next_batch_id;
        self.next_batch_id += 1;
        self.batches_dispatched += 1;

        let operations = entries.iter().map(|entry| entry.operation.clone()).collect();
        self.in_flight.insert(id, entries);
        Some((id, operations))
    }

    /// Reconcile the outcome of a dispatched batch
    pub(crate) fn resolve<C>(
        &mut self,
        id: BatchId,
        outcome: BatchOutcome,
        now: Instant,
        classify: C,
    ) -> Resolution
    where
        C: Fn(&TransportError) -> Classification,
    {
        if self.fatal.is_some() {
            return Resolution::Ignored;
        }
        let entries = match self.in_flight.remove(&id) {
            Some(entries) => entries,
            None => {
                warn!(batch = id, "resolution for unknown batch");
                return Resolution::Ignored;
            }
        };
        let count = entries.len();

        let response = match outcome {
            BatchOutcome::Failed(cause) => {
                self.batches_failed += 1;
                if let Classification::Fatal(fatal) = classify(&cause) {
                    return self.halt(id, fatal);
                }
                warn!(batch = id, operations = count, error = %cause, "bulk request failed, requeueing batch");
                self.requeue(entries, now);
                return Resolution::Settled {
                    acknowledged: 0,
                    requeued: count,
                };
            }
            BatchOutcome::Response(response) => response,
        };

        self.last_request_took = Some(response.took);
        if response.items.len() != count {
            // Items are matched to operations by position only
            warn!(
                batch = id,
                operations = count,
                items = response.items.len(),
                "bulk response item count does not match the batch, requeueing batch"
            );
            self.batches_failed += 1;
            self.requeue(entries, now);
            return Resolution::Settled {
                acknowledged: 0,
                requeued: count,
            };
        }

        let mut failed = Vec::new();
        for (entry, item) in entries.into_iter().zip(response.items) {
            match item {
                ItemResult::Success => {}
                ItemResult::Failed(cause) => {
                    if let Classification::Fatal(fatal) = classify(&cause) {
                        return self.halt(id, fatal);
                    }
                    failed.push(entry);
                }
            }
        }

        let requeued = failed.len();
        let acknowledged = count - requeued;
        self.records_acknowledged += acknowledged as u64;
        if requeued == 0 {
            debug!(
                batch = id,
                operations = count,
                took_ms = response.took.as_millis() as u64,
                "bulk request completed"
            );
        } else {
            debug!(
                batch = id,
                operations = count,
                failed = requeued,
                took_ms = response.took.as_millis() as u64,
                "bulk request partially failed, requeueing failed items"
            );
            self.requeue(failed, now);
        }
        Resolution::Settled {
            acknowledged,
            requeued,
        }
    }

    fn requeue(&mut self, entries: Vec<BufferedEntry>, now: Instant) {
        self.records_requeued += entries.len() as u64;
        self.buffer.requeue_front(entries);
        self.retry_not_before = Some(now + self.config.retry_backoff());
        debug_assert!(self.buffer.check_invariant());
    }

    fn halt(&mut self, id: BatchId, fatal: FatalError) -> Resolution {
        error!(batch = id, error = %fatal, cause = %fatal.cause(), "fatal transport failure, halting writer");
        self.fatal = Some(fatal);
        Resolution::Halted
    }

    /// Snapshot unacknowledged work: in-flight batches in dispatch order,
    /// then the buffer.
    pub(crate) fn snapshot(&self) -> Result<BufferedRequestState> {
        if let Some(fatal) = &self.fatal {
            return Err(SinkError::FatalTransport(fatal.clone()));
        }
        let operations = self
            .in_flight
            .values()
            .flatten()
            .map(|entry| &entry.operation)
            .chain(self.buffer.operations())
            .cloned()
            .collect();
        Ok(BufferedRequestState::new(operations))
    }

    /// When the event loop must wake up to re-evaluate triggers.
    ///
    /// `None` when nothing is buffered or every in-flight slot is taken; a
    /// resolution wakes the loop in that case.
    pub(crate) fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if self.fatal.is_some()
            || self.buffer.is_empty()
            || self.in_flight.len() >= self.config.max_in_flight_requests
        {
            return None;
        }
        match self.retry_not_before {
            Some(at) if at > now => Some(at),
            _ => self
                .buffer
                .oldest_admitted_at()
                .map(|at| at + self.config.max_time_in_buffer()),
        }
    }

    /// True when nothing is buffered or in flight
    pub(crate) fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.in_flight.is_empty()
    }

    pub(crate) fn fatal(&self) -> Option<&FatalError> {
        self.fatal.as_ref()
    }

    pub(crate) fn stats(&self) -> WriterStats {
        WriterStats {
            buffered_requests: self.buffer.len(),
            buffered_bytes: self.buffer.total_bytes(),
            in_flight_batches: self.in_flight.len(),
            in_flight_requests: self.in_flight_operations(),
            records_admitted: self.records_admitted,
            records_acknowledged: self.records_acknowledged,
            records_requeued: self.records_requeued,
            batches_dispatched: self.batches_dispatched,
            batches_failed: self.batches_failed,
            last_request_took: self.last_request_took,
        }
    }

    #[cfg(test)]
    pub(crate) fn buffer(&self) -> &RequestBuffer {
        &self.buffer
    }
}
