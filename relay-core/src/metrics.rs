//! Router-side metrics sink: in-memory counters and
//! histograms, exposed as a read-only snapshot. Rendering the snapshot as
//! Prometheus text is the HTTP boundary's job (`relay-server`).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A coarse exponential-bucket histogram. Good enough for an in-memory,
/// approximate latency distribution without pulling in a full HDR crate.
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

#[derive(Default)]
struct AdapterCounters {
    requests_total: AtomicU64,
    requests_successful: AtomicU64,
    requests_failed: AtomicU64,
    latency: Histogram,
}

/// Process-wide metrics sink for the router half. One instance, constructed
/// at startup and shared via `Arc`.
pub struct MetricsCollector {
    requests_total: AtomicU64,
    requests_successful: AtomicU64,
    requests_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    breaker_transitions: AtomicU64,
    overload_rejections: AtomicU64,
    preferred_overrides: AtomicU64,
    end_to_end_latency: Histogram,
    per_adapter: DashMap<String, AdapterCounters>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_successful: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            breaker_transitions: AtomicU64::new(0),
            overload_rejections: AtomicU64::new(0),
            preferred_overrides: AtomicU64::new(0),
            end_to_end_latency: Histogram::new(),
            per_adapter: DashMap::new(),
        }
    }

    pub fn record_request(&self, adapter: &str, success: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.end_to_end_latency.observe(latency_ms);

        let entry = self.per_adapter.entry(adapter.to_string()).or_default();
        entry.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            entry.requests_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            entry.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        entry.latency.observe(latency_ms);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_breaker_transition(&self) {
        self.breaker_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overload_rejection(&self) {
        self.overload_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preferred_override(&self) {
        self.preferred_overrides.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_successful: self.requests_successful.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            breaker_transitions: self.breaker_transitions.load(Ordering::Relaxed),
            overload_rejections: self.overload_rejections.load(Ordering::Relaxed),
            preferred_overrides: self.preferred_overrides.load(Ordering::Relaxed),
            end_to_end_latency: self.end_to_end_latency.snapshot(),
            per_adapter: self
                .per_adapter
                .iter()
                .map(|kv| {
                    (
                        kv.key().clone(),
                        AdapterMetricsSnapshot {
                            requests_total: kv.requests_total.load(Ordering::Relaxed),
                            requests_successful: kv.requests_successful.load(Ordering::Relaxed),
                            requests_failed: kv.requests_failed.load(Ordering::Relaxed),
                            latency: kv.latency.snapshot(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterMetricsSnapshot {
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub latency: HistogramSnapshot,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_successful: u64,
    pub requests_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub breaker_transitions: u64,
    pub overload_rejections: u64,
    pub preferred_overrides: u64,
    pub end_to_end_latency: HistogramSnapshot,
    pub per_adapter: std::collections::HashMap<String, AdapterMetricsSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonically_non_decreasing() {
        let metrics = MetricsCollector::new();
        metrics.record_request("a", true, 10);
        let first = metrics.snapshot().requests_total;
        metrics.record_request("a", false, 20);
        let second = metrics.snapshot().requests_total;
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
