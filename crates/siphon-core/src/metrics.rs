//! Lock-free per-channel metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-channel counters using atomics (no locks on the data path).
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    /// Batches read from the record source.
    pub batches_read: AtomicU64,
    /// Records pulled from the record source.
    pub records_read: AtomicU64,
    /// Checkpoints persisted.
    pub checkpoints: AtomicU64,
    /// Transient read failures that were retried.
    pub read_retries: AtomicU64,
    /// Processing failures (at most one per channel lifetime).
    pub processing_errors: AtomicU64,
}

impl ChannelMetrics {
    /// Records a successful read.
    pub fn record_read(&self, records: u64) {
        self.batches_read.fetch_add(1, Ordering::Relaxed);
        self.records_read.fetch_add(records, Ordering::Relaxed);
    }

    /// Records a persisted checkpoint.
    pub fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retried transient read failure.
    pub fn record_read_retry(&self) {
        self.read_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal processing failure.
    pub fn record_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            batches_read: self.batches_read.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            read_retries: self.read_retries.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of one channel's metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMetricsSnapshot {
    /// Batches read from the record source.
    pub batches_read: u64,
    /// Records pulled from the record source.
    pub records_read: u64,
    /// Checkpoints persisted.
    pub checkpoints: u64,
    /// Transient read failures that were retried.
    pub read_retries: u64,
    /// Processing failures.
    pub processing_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = ChannelMetrics::default();
        m.record_read(10);
        m.record_read(5);
        m.record_checkpoint();
        m.record_read_retry();

        let snap = m.snapshot();
        assert_eq!(snap.batches_read, 2);
        assert_eq!(snap.records_read, 15);
        assert_eq!(snap.checkpoints, 1);
        assert_eq!(snap.read_retries, 1);
        assert_eq!(snap.processing_errors, 0);
    }
}
