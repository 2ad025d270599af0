//! Dispatch counters.
//!
//! Messages flagged as internal calls are never counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters maintained by the dispatcher.
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Messages handed to the transport.
    submitted: AtomicU64,
    /// Messages completed with a value.
    completed: AtomicU64,
    /// Messages completed with an error, including refusals before hand-off.
    failed: AtomicU64,
    /// Fire-and-forget messages dispatched, sent or not.
    fire_and_forget: AtomicU64,
    /// Messages routed to an endpoint of the role they did not prefer.
    non_preferred: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchMetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub fire_and_forget: u64,
    pub non_preferred: u64,
    pub uptime_secs: u64,
}

impl DispatchMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            fire_and_forget: AtomicU64::new(0),
            non_preferred: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fire_and_forget(&self) {
        self.fire_and_forget.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_non_preferred(&self) {
        self.non_preferred.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the uptime duration.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn fire_and_forget(&self) -> u64 {
        self.fire_and_forget.load(Ordering::Relaxed)
    }

    pub fn non_preferred(&self) -> u64 {
        self.non_preferred.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            submitted: self.submitted(),
            completed: self.completed(),
            failed: self.failed(),
            fire_and_forget: self.fire_and_forget(),
            non_preferred: self.non_preferred(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = DispatchMetrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_completed();
        metrics.record_failed();
        metrics.record_non_preferred();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.fire_and_forget, 0);
        assert_eq!(snapshot.non_preferred, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(DispatchMetrics::new().snapshot()).unwrap();
        assert_eq!(json["submitted"], 0);
        assert!(json.get("uptime_secs").is_some());
    }
}
