//! Pool-side metrics sink: in-memory counters and histograms for queueing,
//! scaling, and worker-startup behavior. Deliberately independent of
//! `relay-core::metrics` (the two crates do not depend on each other);
//! the small exponential-bucket histogram is duplicated rather than
//! shared, matching how each crate owns its own metrics surface.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bounds_ms: Vec<u64>,
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        let bounds_ms = vec![5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];
        let buckets = (0..=bounds_ms.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            bounds_ms,
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value_ms: u64) {
        let idx = self
            .bounds_ms
            .iter()
            .position(|b| value_ms <= *b)
            .unwrap_or(self.bounds_ms.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds_ms: self.bounds_ms.clone(),
            bucket_counts: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub bounds_ms: Vec<u64>,
    pub bucket_counts: Vec<u64>,
    pub sum_ms: u64,
    pub count: u64,
}

/// Process-wide metrics sink for the pool half. One instance, constructed
/// at startup and shared via `Arc`.
pub struct PoolMetricsCollector {
    scale_events: AtomicU64,
    overload_rejections: AtomicU64,
    worker_crashes: AtomicU64,
    queue_wait: Histogram,
    worker_startup: Histogram,
}

impl Default for PoolMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetricsCollector {
    pub fn new() -> Self {
        Self {
            scale_events: AtomicU64::new(0),
            overload_rejections: AtomicU64::new(0),
            worker_crashes: AtomicU64::new(0),
            queue_wait: Histogram::new(),
            worker_startup: Histogram::new(),
        }
    }

    pub fn record_scale_event(&self) {
        self.scale_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overload_rejection(&self) {
        self.overload_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_crash(&self) {
        self.worker_crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_wait(&self, wait_ms: u64) {
        self.queue_wait.observe(wait_ms);
    }

    pub fn record_worker_startup(&self, startup_ms: u64) {
        self.worker_startup.observe(startup_ms);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            scale_events: self.scale_events.load(Ordering::Relaxed),
            overload_rejections: self.overload_rejections.load(Ordering::Relaxed),
            worker_crashes: self.worker_crashes.load(Ordering::Relaxed),
            queue_wait: self.queue_wait.snapshot(),
            worker_startup: self.worker_startup.snapshot(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetricsSnapshot {
    pub scale_events: u64,
    pub overload_rejections: u64,
    pub worker_crashes: u64,
    pub queue_wait: HistogramSnapshot,
    pub worker_startup: HistogramSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonically_non_decreasing() {
        let metrics = PoolMetricsCollector::new();
        metrics.record_scale_event();
        let first = metrics.snapshot().scale_events;
        metrics.record_scale_event();
        let second = metrics.snapshot().scale_events;
        assert!(second >= first);
        assert_eq!(second, 2);
    }

    #[test]
    fn histogram_tracks_count_and_sum() {
        let hist = Histogram::new();
        hist.observe(5);
        hist.observe(15);
        let snap = hist.snapshot();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.sum_ms, 20);
    }
}
