//! Writer metrics snapshot

use std::time::Duration;

/// Point-in-time counters of a bulk writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Operations waiting in the buffer.
    pub buffered_requests: usize,
    /// Summed size of the buffered operations.
    pub buffered_bytes: u64,
    /// Batches dispatched and awaiting resolution.
    pub in_flight_batches: usize,
    /// Operations inside in-flight batches.
    pub in_flight_requests: usize,
    /// Records accepted by `write` (restored operations excluded).
    pub records_admitted: u64,
    /// Operations the store acknowledged.
    pub records_acknowledged: u64,
    /// Operations put back in the buffer after a failure.
    pub records_requeued: u64,
    /// Batches handed to the transport.
    pub batches_dispatched: u64,
    /// Batches whose request failed as a whole.
    pub batches_failed: u64,
    /// `took` of the last response that reached the store.
    pub last_request_took: Option<Duration>,
}

impl WriterStats {
    /// Operations not yet acknowledged, buffered or in flight
    pub fn pending_requests(&self) -> usize {
        self.buffered_requests + self.in_flight_requests
    }

    /// True when nothing is buffered or in flight
    pub fn is_idle(&self) -> bool {
        self.pending_requests() == 0
    }
}
