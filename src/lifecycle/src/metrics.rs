//! Per-engine metrics tracking.
//!
//! Thread-safe running totals kept with atomic counters; both engines
//! share this shape so the monitor can read them uniformly.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Thread-safe counters for one engine's job activity.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    retries_scheduled: AtomicU64,
    records_processed: AtomicU64,
    records_affected: AtomicU64,
    storage_bytes: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self) {
        self.inner.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(
        &self,
        records_processed: u64,
        records_affected: u64,
        storage_mb: f64,
        duration: Duration,
    ) {
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .records_processed
            .fetch_add(records_processed, Ordering::Relaxed);
        self.inner
            .records_affected
            .fetch_add(records_affected, Ordering::Relaxed);
        self.inner
            .storage_bytes
            .fetch_add((storage_mb * BYTES_PER_MB) as u64, Ordering::Relaxed);
        self.inner
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.inner.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_submitted(&self) -> u64 {
        self.inner.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.inner.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.inner.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_cancelled(&self) -> u64 {
        self.inner.jobs_cancelled.load(Ordering::Relaxed)
    }

    pub fn retries_scheduled(&self) -> u64 {
        self.inner.retries_scheduled.load(Ordering::Relaxed)
    }

    pub fn records_processed(&self) -> u64 {
        self.inner.records_processed.load(Ordering::Relaxed)
    }

    pub fn records_affected(&self) -> u64 {
        self.inner.records_affected.load(Ordering::Relaxed)
    }

    pub fn storage_mb(&self) -> f64 {
        self.inner.storage_bytes.load(Ordering::Relaxed) as f64 / BYTES_PER_MB
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.inner.total_duration_ms.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics snapshot exposed by an engine's query surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatistics {
    pub running: bool,
    pub workers: usize,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub retries_scheduled: u64,
    pub records_processed: u64,
    pub records_affected: u64,
    /// Megabytes freed (cleanup engine) or archived (archival manager).
    pub storage_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_submission();
        metrics.record_submission();
        metrics.record_success(100, 50, 2.5, Duration::from_millis(20));
        metrics.record_failure();

        assert_eq!(metrics.jobs_submitted(), 2);
        assert_eq!(metrics.jobs_completed(), 1);
        assert_eq!(metrics.jobs_failed(), 1);
        assert_eq!(metrics.records_processed(), 100);
        assert!((metrics.storage_mb() - 2.5).abs() < 0.001);
    }

    #[test]
    fn test_clones_share_state() {
        let metrics = EngineMetrics::new();
        let clone = metrics.clone();
        clone.record_retry();
        assert_eq!(metrics.retries_scheduled(), 1);
    }
}
