// ABOUTME: Metrics and observability for the session fleet
//
// Tracks:
// - Connects: attempts, successes, failures, retries
// - Concurrency: connects in flight and the observed peak
// - Broadcasts: batches issued and per-target failures
// - Sessions: created and removed

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Pool-level metrics
#[derive(Debug, Default)]
pub struct FleetMetrics {
    pub connect_attempts: AtomicU64,
    pub connect_successes: AtomicU64,
    pub connect_failures: AtomicU64,
    pub retries: AtomicU64,
    pub connects_in_flight: AtomicU32,
    pub peak_connects_in_flight: AtomicU32,
    pub broadcasts: AtomicU64,
    pub broadcast_failures: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_removed: AtomicU64,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a transport connect attempt as in flight until the guard drops
    pub fn connect_started(&self) -> InFlightConnect<'_> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let now = self.connects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connects_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightConnect { metrics: self }
    }

    pub fn record_connect_success(&self) {
        self.connect_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, failures: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.broadcast_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
    }

    pub fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_removed(&self) {
        self.sessions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peak_in_flight(&self) -> u32 {
        self.peak_connects_in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_successes: self.connect_successes.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            connects_in_flight: self.connects_in_flight.load(Ordering::SeqCst),
            peak_connects_in_flight: self.peak_in_flight(),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            broadcast_failures: self.broadcast_failures.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_removed: self.sessions_removed.load(Ordering::Relaxed),
        }
    }
}

/// Guard for one in-flight connect attempt
pub struct InFlightConnect<'a> {
    metrics: &'a FleetMetrics,
}

impl Drop for InFlightConnect<'_> {
    fn drop(&mut self) {
        self.metrics.connects_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub connect_successes: u64,
    pub connect_failures: u64,
    pub retries: u64,
    pub connects_in_flight: u32,
    pub peak_connects_in_flight: u32,
    pub broadcasts: u64,
    pub broadcast_failures: u64,
    pub sessions_created: u64,
    pub sessions_removed: u64,
}
