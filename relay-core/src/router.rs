//! Router: the core selection and retry/fallback algorithm.
//!
//! Selection scores every adapter that is `Closed`/`HalfOpen` *and* healthy
//! on five weighted axes, applies the `preferred_backend` hint as an
//! epsilon tie-break (never a hard override — an Open adapter is never
//! selected, by construction, since it never enters the candidate set),
//! and executes with sequential retry/fallback across remaining candidates
//! until `max_retries` is exhausted or the deadline passes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterEntry;
use crate::cache::{fingerprint, ResponseCache};
use crate::classifier::{self, Classification};
use crate::common::backoff_with_jitter;
use crate::error::{ErrorKind, FailureKind, RouterError};
use crate::metrics::MetricsCollector;
use crate::models::{Request, Response};

/// Weights for `score()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterWeights {
    pub w_task: f64,
    pub w_perf: f64,
    pub w_cost: f64,
    pub w_avail: f64,
    pub w_quality: f64,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            w_task: 0.25,
            w_perf: 0.2,
            w_cost: 0.2,
            w_avail: 0.2,
            w_quality: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub weights: RouterWeights,
    /// Reference latency (ms) that normalizes `perfScore`.
    pub reference_latency_ms: f64,
    /// Tie-break / hint bonus added to a preferred adapter's score. Small
    /// enough to only break near-ties — a nudge, never a hard override.
    pub preferred_bonus: f64,
    pub retry_base_delay: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: RouterWeights::default(),
            reference_latency_ms: 1000.0,
            preferred_bonus: 0.01,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

/// Known, normalized maximum cost (USD per 1K tokens, input+output summed)
/// used to normalize `costScore`. An adapter above this is clamped to the
/// cheapest-looking score of 0; this is a static ceiling, not observed.
const COST_CEILING_PER_1K: f64 = 0.12;

fn normalized_cost(entry: &AdapterEntry) -> f64 {
    let total = entry.config.cost_per_1k_input + entry.config.cost_per_1k_output;
    (total / COST_CEILING_PER_1K).clamp(0.0, 1.0)
}

fn perf_score(entry: &AdapterEntry, reference_latency_ms: f64) -> f64 {
    let ewma = entry.stats.ewma_latency_ms();
    1.0 / (1.0 + ewma / reference_latency_ms.max(1.0))
}

fn cost_score(entry: &AdapterEntry) -> f64 {
    1.0 - normalized_cost(entry)
}

fn avail_score(entry: &AdapterEntry) -> f64 {
    entry.stats.success_ratio()
}

fn quality_score(entry: &AdapterEntry) -> f64 {
    entry.config.quality_rating
}

fn task_fit(entry: &AdapterEntry, classification: &Classification) -> f64 {
    classification.dot(&entry.config.task_affinities)
}

/// One scored candidate, kept around for tie-breaking and logging.
struct Scored {
    entry: Arc<AdapterEntry>,
    score: f64,
    avail: f64,
    cost: f64,
}

/// `score(a)`, plus the preferred-backend epsilon bonus.
fn score_adapter(
    entry: &Arc<AdapterEntry>,
    classification: &Classification,
    weights: &RouterWeights,
    reference_latency_ms: f64,
    preferred: Option<&str>,
    preferred_bonus: f64,
) -> Scored {
    let base = weights.w_task * task_fit(entry, classification)
        + weights.w_perf * perf_score(entry, reference_latency_ms)
        + weights.w_cost * cost_score(entry)
        + weights.w_avail * avail_score(entry)
        + weights.w_quality * quality_score(entry);

    let bonus = if preferred == Some(entry.name()) {
        preferred_bonus
    } else {
        0.0
    };

    Scored {
        score: base + bonus,
        avail: avail_score(entry),
        cost: normalized_cost(entry),
        entry: entry.clone(),
    }
}

/// Picks the best-scored candidate. Tie-break: higher availScore, then
/// lower cost, then lexicographic name.
fn pick_best(mut candidates: Vec<Scored>) -> Option<Scored> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.avail.partial_cmp(&a.avail).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.cost.partial_cmp(&b.cost).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.entry.name().cmp(b.entry.name()))
    });
    candidates.into_iter().next()
}

/// Eligible set `E`: adapters that are (Closed ∨ HalfOpen) ∧ healthy. The
/// circuit state check is advisory here — actual admission happens via
/// `try_acquire` at call time, so a state flip between selection and
/// execution is handled by simply moving to the next candidate.
async fn eligible(registry: &crate::adapter::AdapterRegistry) -> Vec<Arc<AdapterEntry>> {
    let mut out = Vec::new();
    for entry in registry.all() {
        if !entry.stats.is_healthy() {
            continue;
        }
        if entry.breaker.state().await != crate::circuit_breaker::CircuitState::Open {
            out.push(entry.clone());
        }
    }
    out
}

pub struct Router {
    registry: Arc<crate::adapter::AdapterRegistry>,
    cache: Arc<ResponseCache>,
    metrics: Arc<MetricsCollector>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        registry: Arc<crate::adapter::AdapterRegistry>,
        cache: Arc<ResponseCache>,
        metrics: Arc<MetricsCollector>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<crate::adapter::AdapterRegistry> {
        &self.registry
    }

    /// `optimize(prompt, attachments, options) -> Response`.
    pub async fn optimize(&self, request: Request) -> Result<Response, RouterError> {
        if request.is_past_deadline() {
            return Err(RouterError::DeadlineExceeded);
        }

        let key = fingerprint(&request);
        if !request.options.bypass_cache {
            if let Some(cached) = self.cache.get(&key) {
                self.metrics.record_cache_hit();
                return Ok(cached);
            }
            self.metrics.record_cache_miss();
        }

        let classification = classifier::classify(&request.prompt);
        let result = self.execute(&request, &classification).await;

        match &result {
            Ok(response) => {
                if !request.options.bypass_cache {
                    self.cache.put(key, response.clone());
                }
            }
            Err(_) => {}
        }
        result
    }

    /// Selection + sequential retry/fallback loop. Attempts are strictly
    /// sequential; attempt N+1 begins only after attempt N terminates.
    async fn execute(
        &self,
        request: &Request,
        classification: &Classification,
    ) -> Result<Response, RouterError> {
        let mut excluded: Vec<String> = Vec::new();
        let max_attempts = request.options.max_retries + 1;
        let mut attempt = 0u32;
        let mut last_error: Option<RouterError> = None;

        loop {
            if request.is_past_deadline() {
                return Err(RouterError::DeadlineExceeded);
            }
            if attempt >= max_attempts {
                break;
            }

            let eligible_entries = eligible(&self.registry).await;
            let score = |e: &Arc<AdapterEntry>| {
                score_adapter(
                    e,
                    classification,
                    &self.config.weights,
                    self.config.reference_latency_ms,
                    request.options.preferred_backend.as_deref(),
                    self.config.preferred_bonus,
                )
            };

            // Prefer an adapter we haven't just tried, but `excluded` is a
            // per-attempt steer, not a permanent ban: if it would empty the
            // candidate set (e.g. a single healthy adapter), fall back to
            // the full eligible set so that adapter stays retryable.
            let mut candidates: Vec<Scored> = eligible_entries
                .iter()
                .filter(|e| !excluded.contains(&e.name().to_string()))
                .map(score)
                .collect();
            if candidates.is_empty() {
                candidates = eligible_entries.iter().map(score).collect();
            }

            let Some(chosen) = pick_best(candidates) else {
                return Err(last_error.unwrap_or(RouterError::NoHealthyBackend));
            };

            // `preferred_override` counts the case where the hint named a
            // backend on this attempt but that backend was not chosen,
            // either because it never entered the eligible set (e.g. an
            // Open breaker) or another adapter simply scored higher. The
            // hint is a tie-break bonus, never a hard override, so this
            // counter is the auditable record that the override happened.
            if let Some(preferred) = request.options.preferred_backend.as_deref() {
                if excluded.is_empty() && preferred != chosen.entry.name() {
                    self.metrics.record_preferred_override();
                    tracing::info!(
                        preferred,
                        chosen = chosen.entry.name(),
                        "preferred_backend hint overridden by scoring/health"
                    );
                }
            }

            attempt += 1;
            let outcome = self.attempt(request, &chosen.entry).await;
            match outcome {
                AttemptOutcome::Success(response) => {
                    self.metrics.record_request(chosen.entry.name(), true, response.latency_ms);
                    return Ok(response);
                }
                AttemptOutcome::Retryable(err) => {
                    self.metrics.record_request(chosen.entry.name(), false, 0);
                    excluded.push(chosen.entry.name().to_string());
                    last_error = Some(err);
                    if attempt < max_attempts && !request.is_past_deadline() {
                        let delay = backoff_with_jitter(attempt - 1, self.config.retry_base_delay);
                        let remaining = request.remaining();
                        let sleep_for = match remaining {
                            Some(r) if r < delay => r,
                            _ => delay,
                        };
                        tokio::time::sleep(sleep_for).await;
                    }
                }
                AttemptOutcome::Permanent(err) => {
                    self.metrics.record_request(chosen.entry.name(), false, 0);
                    return Err(err);
                }
                AttemptOutcome::DeadlineExceeded => {
                    return Err(RouterError::DeadlineExceeded);
                }
            }
        }

        Err(last_error.unwrap_or(RouterError::NoHealthyBackend))
    }

    /// Invoke the chosen adapter once, under a per-attempt timeout and the
    /// breaker's admission gate. Classifies the result into an
    /// [`AttemptOutcome`] that drives the retry loop via explicit result
    /// variants rather than exceptions.
    async fn attempt(&self, request: &Request, entry: &Arc<AdapterEntry>) -> AttemptOutcome {
        let admitted = match entry.breaker.try_acquire().await {
            Ok(a) => a,
            Err(_) => {
                return AttemptOutcome::Retryable(RouterError::BackendUnavailable {
                    adapter: entry.name().to_string(),
                })
            }
        };

        let (per_attempt_timeout, deadline_limited) = match request.remaining() {
            Some(remaining) if remaining < entry.config.timeout => (remaining, true),
            Some(remaining) => (remaining, false),
            None => (entry.config.timeout, false),
        };

        let started = Instant::now();
        let call = tokio::time::timeout(per_attempt_timeout, entry.adapter.send(request)).await;

        match call {
            Err(_elapsed) if deadline_limited => {
                // The deadline, not the adapter, cut this attempt short: a
                // caller concern, not an adapter failure.
                AttemptOutcome::DeadlineExceeded
            }
            Err(_elapsed) => {
                if entry.breaker.on_failure(admitted, FailureKind::Transient).await {
                    self.metrics.record_breaker_transition();
                }
                entry.stats.record_call_outcome(false, per_attempt_timeout.as_millis() as u64);
                AttemptOutcome::Retryable(RouterError::Internal {
                    component: entry.name().to_string(),
                    message: "adapter call timed out".to_string(),
                })
            }
            Ok(Ok(mut response)) => {
                if entry.breaker.on_success(admitted).await {
                    self.metrics.record_breaker_transition();
                }
                let latency_ms = started.elapsed().as_millis() as u64;
                entry.stats.record_call_outcome(true, latency_ms);
                response.latency_ms = latency_ms;
                response.backend_used = entry.name().to_string();
                AttemptOutcome::Success(response)
            }
            Ok(Err(adapter_err)) => {
                let kind = adapter_err.kind();
                if entry.breaker.on_failure(admitted, kind).await {
                    self.metrics.record_breaker_transition();
                }
                let latency_ms = started.elapsed().as_millis() as u64;
                entry.stats.record_call_outcome(false, latency_ms);

                match kind {
                    FailureKind::PermanentClient => {
                        AttemptOutcome::Permanent(RouterError::Validation {
                            component: entry.name().to_string(),
                            message: adapter_err.to_string(),
                        })
                    }
                    FailureKind::RateLimited => AttemptOutcome::Retryable(RouterError::RateLimited {
                        adapter: entry.name().to_string(),
                        retry_after_ms: adapter_err.retry_after_ms(),
                    }),
                    FailureKind::Transient | FailureKind::PermanentServer => {
                        AttemptOutcome::Retryable(RouterError::Internal {
                            component: entry.name().to_string(),
                            message: adapter_err.to_string(),
                        })
                    }
                }
            }
        }
    }
}

enum AttemptOutcome {
    Success(Response),
    /// Transient/RateLimited/PermanentServer: try the next adapter.
    Retryable(RouterError),
    /// PermanentClient: surface immediately, no retry.
    Permanent(RouterError),
    DeadlineExceeded,
}

impl RouterError {
    pub fn error_kind(&self) -> ErrorKind {
        self.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, AdapterConfig, AdapterEntry, ProbeResult};
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::error::AdapterError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoAdapter {
        name: String,
    }

    #[async_trait]
    impl Adapter for EchoAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, request: &Request) -> Result<Response, AdapterError> {
            Ok(Response {
                content: request.prompt.clone(),
                backend_used: self.name.clone(),
                input_tokens: request.prompt.len() as u32,
                output_tokens: request.prompt.len() as u32,
                cost_usd: 0.0,
                latency_ms: 0,
                cache_hit: false,
                metadata: HashMap::new(),
            })
        }

        async fn health_probe(&self) -> Result<ProbeResult, AdapterError> {
            Ok(ProbeResult {
                ok: true,
                latency: Duration::from_millis(1),
            })
        }
    }

    struct FailNTimesAdapter {
        name: String,
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl Adapter for FailNTimesAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, request: &Request) -> Result<Response, AdapterError> {
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| {
                if x > 0 {
                    Some(x - 1)
                } else {
                    None
                }
            }).is_ok()
            {
                return Err(AdapterError::Transient {
                    message: "boom".to_string(),
                });
            }
            Ok(Response {
                content: request.prompt.clone(),
                backend_used: self.name.clone(),
                input_tokens: 1,
                output_tokens: 1,
                cost_usd: 0.0,
                latency_ms: 0,
                cache_hit: false,
                metadata: HashMap::new(),
            })
        }

        async fn health_probe(&self) -> Result<ProbeResult, AdapterError> {
            Ok(ProbeResult {
                ok: true,
                latency: Duration::from_millis(1),
            })
        }
    }

    fn make_router(entries: Vec<AdapterEntry>) -> Router {
        let mut registry = crate::adapter::AdapterRegistry::new();
        for entry in entries {
            registry.register(entry);
        }
        Router::new(
            Arc::new(registry),
            Arc::new(ResponseCache::new(Default::default())),
            Arc::new(MetricsCollector::new()),
            RouterConfig::default(),
        )
    }

    #[tokio::test]
    async fn single_healthy_adapter_echoes_and_then_hits_cache() {
        let entry = AdapterEntry::new(
            AdapterConfig::new("A"),
            Box::new(EchoAdapter { name: "A".into() }),
            CircuitBreakerConfig::default(),
        );
        let router = make_router(vec![entry]);

        let resp = router.optimize(Request::new("ping")).await.unwrap();
        assert_eq!(resp.content, "ping");
        assert_eq!(resp.backend_used, "A");
        assert!(!resp.cache_hit);

        let resp2 = router.optimize(Request::new("ping")).await.unwrap();
        assert!(resp2.cache_hit);
        assert_eq!(resp2.content, "ping");
    }

    #[tokio::test]
    async fn bypass_cache_never_reads_or_writes() {
        let entry = AdapterEntry::new(
            AdapterConfig::new("A"),
            Box::new(EchoAdapter { name: "A".into() }),
            CircuitBreakerConfig::default(),
        );
        let router = make_router(vec![entry]);

        let mut req = Request::new("ping");
        req.options.bypass_cache = true;
        router.optimize(req.clone()).await.unwrap();
        let resp2 = router.optimize(req).await.unwrap();
        assert!(!resp2.cache_hit);
    }

    #[tokio::test]
    async fn no_healthy_backend_fails_fast_without_retries() {
        let router = make_router(vec![]);
        let err = router.optimize(Request::new("ping")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoHealthyBackend);
    }

    #[tokio::test]
    async fn zero_deadline_fails_immediately() {
        let entry = AdapterEntry::new(
            AdapterConfig::new("A"),
            Box::new(EchoAdapter { name: "A".into() }),
            CircuitBreakerConfig::default(),
        );
        let router = make_router(vec![entry]);

        let mut req = Request::new("ping");
        req.options.deadline = Some(Instant::now());
        let err = router.optimize(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn retries_absorb_transient_failures_until_success() {
        let entry = AdapterEntry::new(
            AdapterConfig::new("A"),
            Box::new(FailNTimesAdapter {
                name: "A".into(),
                remaining_failures: AtomicU32::new(2),
            }),
            CircuitBreakerConfig {
                failure_threshold: 3,
                ..CircuitBreakerConfig::default()
            },
        );
        let mut router = make_router(vec![entry]);
        router.config.retry_base_delay = Duration::from_millis(1);

        let mut req = Request::new("ping");
        req.options.max_retries = 3;
        let resp = router.optimize(req).await.unwrap();
        assert_eq!(resp.content, "ping");
    }

    #[tokio::test]
    async fn preferred_backend_does_not_override_open_breaker() {
        let open_entry = AdapterEntry::new(
            AdapterConfig::new("Open"),
            Box::new(EchoAdapter { name: "Open".into() }),
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(300),
                ..CircuitBreakerConfig::default()
            },
        );
        open_entry.breaker.force_open().await;

        let healthy_entry = AdapterEntry::new(
            AdapterConfig::new("Healthy"),
            Box::new(EchoAdapter { name: "Healthy".into() }),
            CircuitBreakerConfig::default(),
        );

        let router = make_router(vec![open_entry, healthy_entry]);
        let mut req = Request::new("ping");
        req.options.preferred_backend = Some("Open".to_string());
        let resp = router.optimize(req).await.unwrap();
        assert_eq!(resp.backend_used, "Healthy");
    }

    #[tokio::test]
    async fn preferred_backend_naming_open_adapter_records_override_metric() {
        let open_entry = AdapterEntry::new(
            AdapterConfig::new("Open"),
            Box::new(EchoAdapter { name: "Open".into() }),
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(300),
                ..CircuitBreakerConfig::default()
            },
        );
        open_entry.breaker.force_open().await;

        let healthy_entry = AdapterEntry::new(
            AdapterConfig::new("Healthy"),
            Box::new(EchoAdapter { name: "Healthy".into() }),
            CircuitBreakerConfig::default(),
        );

        let router = make_router(vec![open_entry, healthy_entry]);
        let mut req = Request::new("ping");
        req.options.preferred_backend = Some("Open".to_string());
        let resp = router.optimize(req).await.unwrap();
        assert_eq!(resp.backend_used, "Healthy");
        assert_eq!(router.metrics().snapshot().preferred_overrides, 1);
    }

    #[tokio::test]
    async fn honored_preference_does_not_record_override_metric() {
        let entry = AdapterEntry::new(
            AdapterConfig::new("A"),
            Box::new(EchoAdapter { name: "A".into() }),
            CircuitBreakerConfig::default(),
        );
        let router = make_router(vec![entry]);
        let mut req = Request::new("ping");
        req.options.preferred_backend = Some("A".to_string());
        router.optimize(req).await.unwrap();
        assert_eq!(router.metrics().snapshot().preferred_overrides, 0);
    }
}
