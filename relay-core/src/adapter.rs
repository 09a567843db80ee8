//! Backend adapter: a uniform capability over one remote completion service.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::AdapterError;
use crate::models::Request;

/// Declared, mostly-static facts about an adapter, set at configuration load
/// and never mutated by request handlers.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub name: String,
    pub supports_streaming: bool,
    pub supports_tool_calls: bool,
    /// USD per 1K input tokens.
    pub cost_per_1k_input: f64,
    /// USD per 1K output tokens.
    pub cost_per_1k_output: f64,
    pub typical_latency_ms: u64,
    pub concurrency_cap: u32,
    /// Static quality rating in [0, 1], feeds `qualityScore`.
    pub quality_rating: f64,
    /// Task-affinity vector matching the classifier's axis order
    /// (math, code, reasoning, language_en, language_other, short, long).
    pub task_affinities: [f64; 7],
    /// Per-attempt timeout applied by the router.
    pub timeout: Duration,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supports_streaming: false,
            supports_tool_calls: false,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
            typical_latency_ms: 500,
            concurrency_cap: 16,
            quality_rating: 0.5,
            task_affinities: [0.2; 7],
            timeout: Duration::from_secs(30),
        }
    }
}

/// Uniform capability over one remote completion service.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: &Request) -> Result<crate::models::Response, AdapterError>;

    async fn health_probe(&self) -> Result<ProbeResult, AdapterError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub ok: bool,
    pub latency: Duration,
}

/// Rolling statistics shared by the health monitor (C3) and the router
/// (C5). `success_window` holds the last N outcomes for `availScore`; EWMA
/// latency is updated both by completed calls and by health probes, using
/// the same smoothing factor so the two data sources stay consistent.
pub struct AdapterStats {
    inner: Mutex<StatsInner>,
    window_size: usize,
}

struct StatsInner {
    ewma_latency_ms: f64,
    success_window: VecDeque<bool>,
    healthy: bool,
    last_probe_latency_ms: Option<u64>,
}

const EWMA_ALPHA: f64 = 0.3;

impl AdapterStats {
    pub fn new(window_size: usize, initial_latency_ms: f64) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                ewma_latency_ms: initial_latency_ms,
                success_window: VecDeque::with_capacity(window_size),
                healthy: true,
                last_probe_latency_ms: None,
            }),
            window_size,
        }
    }

    pub fn record_call_outcome(&self, success: bool, latency_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.ewma_latency_ms =
            EWMA_ALPHA * latency_ms as f64 + (1.0 - EWMA_ALPHA) * inner.ewma_latency_ms;
        if inner.success_window.len() == self.window_size {
            inner.success_window.pop_front();
        }
        inner.success_window.push_back(success);
    }

    pub fn record_probe(&self, result: &ProbeResult) {
        let mut inner = self.inner.lock().unwrap();
        let latency_ms = result.latency.as_millis() as u64;
        inner.ewma_latency_ms =
            EWMA_ALPHA * latency_ms as f64 + (1.0 - EWMA_ALPHA) * inner.ewma_latency_ms;
        inner.last_probe_latency_ms = Some(latency_ms);
        inner.healthy = result.ok;
    }

    pub fn mark_unhealthy(&self) {
        self.inner.lock().unwrap().healthy = false;
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.lock().unwrap().healthy
    }

    pub fn ewma_latency_ms(&self) -> f64 {
        self.inner.lock().unwrap().ewma_latency_ms
    }

    /// Rolling success ratio over the last N calls; 1.0 (optimistic) when
    /// no calls have been observed yet so a fresh adapter isn't penalized.
    pub fn success_ratio(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.success_window.is_empty() {
            return 1.0;
        }
        let successes = inner.success_window.iter().filter(|x| **x).count();
        successes as f64 / inner.success_window.len() as f64
    }

    pub fn last_probe_latency_ms(&self) -> Option<u64> {
        self.inner.lock().unwrap().last_probe_latency_ms
    }
}

/// An adapter plus its owned circuit breaker and rolling stats. The router
/// holds only a non-owning lookup (`&AdapterEntry` / `Arc<AdapterEntry>`)
/// so ownership of breaker/health state stays with the adapter entry.
pub struct AdapterEntry {
    pub config: AdapterConfig,
    pub adapter: Box<dyn Adapter>,
    pub breaker: crate::circuit_breaker::CircuitBreaker,
    pub stats: AdapterStats,
}

impl AdapterEntry {
    pub fn new(
        config: AdapterConfig,
        adapter: Box<dyn Adapter>,
        breaker_config: crate::circuit_breaker::CircuitBreakerConfig,
    ) -> Self {
        let window_size = 50;
        let initial_latency = config.typical_latency_ms as f64;
        let breaker = crate::circuit_breaker::CircuitBreaker::new(config.name.clone(), breaker_config);
        Self {
            config,
            adapter,
            breaker,
            stats: AdapterStats::new(window_size, initial_latency),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Registry of adapters keyed by name, constructed once at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    entries: HashMap<String, std::sync::Arc<AdapterEntry>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: AdapterEntry) {
        self.entries
            .insert(entry.name().to_string(), std::sync::Arc::new(entry));
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<AdapterEntry>> {
        self.entries.get(name).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &std::sync::Arc<AdapterEntry>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_adapter_has_optimistic_success_ratio() {
        let stats = AdapterStats::new(50, 500.0);
        assert_eq!(stats.success_ratio(), 1.0);
    }

    #[test]
    fn success_window_tracks_ratio_over_last_n() {
        let stats = AdapterStats::new(4, 500.0);
        stats.record_call_outcome(true, 100);
        stats.record_call_outcome(true, 100);
        stats.record_call_outcome(false, 100);
        stats.record_call_outcome(false, 100);
        assert_eq!(stats.success_ratio(), 0.5);
        stats.record_call_outcome(true, 100);
        // window size 4, oldest (true) dropped: true,false,false,true -> 0.5
        assert_eq!(stats.success_ratio(), 0.5);
    }

    #[test]
    fn ewma_latency_moves_toward_new_samples() {
        let stats = AdapterStats::new(50, 1000.0);
        stats.record_call_outcome(true, 0);
        // alpha=0.3: 0.3*0 + 0.7*1000 = 700
        assert!((stats.ewma_latency_ms() - 700.0).abs() < 1e-6);
    }
}
