//! Per-adapter circuit breaker: a failure gate with half-open probing.
//!
//! One breaker instance is owned by each backend adapter. The breaker does not
//! execute calls itself — the router asks [`CircuitBreaker::try_acquire`]
//! whether an attempt may proceed, then reports the outcome back with
//! [`CircuitBreaker::on_success`] or [`CircuitBreaker::on_failure`]. Keeping
//! execution out of the breaker lets the router apply the per-attempt
//! deadline (`min(remaining_deadline, adapter.timeout)`) uniformly across
//! adapters instead of baking a single timeout into the gate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::FailureKind;

/// Circuit breaker operational states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables for one breaker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive countable failures before the breaker opens.
    pub failure_threshold: u32,
    /// Time spent Open before the next call is admitted as a half-open probe.
    #[serde(with = "crate::common::duration_serde")]
    pub recovery_timeout: Duration,
    /// Concurrent probes admitted while HalfOpen.
    pub half_open_max_probes: u32,
    /// Sliding window: a countable failure older than this no longer
    /// contributes to the Closed-state consecutive-failure counter.
    #[serde(with = "crate::common::duration_serde")]
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(30_000),
            half_open_max_probes: 1,
            monitoring_period: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    recovery_deadline: Option<Instant>,
    half_open_inflight: u32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            recovery_deadline: None,
            half_open_inflight: 0,
        }
    }
}

/// A lease returned by [`CircuitBreaker::try_acquire`]; drop it by calling
/// `on_success`/`on_failure`, not by letting it fall out of scope, so the
/// breaker's half-open probe slot is always accounted for.
#[derive(Debug, Clone, Copy)]
pub struct Admitted {
    was_probe: bool,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("circuit is open")]
    Open,
}

use thiserror::Error;

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<State>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Ask whether an attempt may proceed right now. On Open, this also
    /// performs the Open -> HalfOpen transition if `recovery_timeout` has
    /// elapsed.
    pub async fn try_acquire(&self) -> Result<Admitted, Rejection> {
        let mut st = self.state.write().await;
        match st.state {
            CircuitState::Closed => Ok(Admitted { was_probe: false }),
            CircuitState::Open => {
                let recovery = st.recovery_deadline.unwrap_or_else(Instant::now);
                if Instant::now() >= recovery {
                    st.state = CircuitState::HalfOpen;
                    st.half_open_inflight = 1;
                    tracing::info!(adapter = %self.name, "circuit breaker Open -> HalfOpen");
                    Ok(Admitted { was_probe: true })
                } else {
                    Err(Rejection::Open)
                }
            }
            CircuitState::HalfOpen => {
                if st.half_open_inflight < self.config.half_open_max_probes {
                    st.half_open_inflight += 1;
                    Ok(Admitted { was_probe: true })
                } else {
                    Err(Rejection::Open)
                }
            }
        }
    }

    /// Returns `true` if this call caused a state transition (for the
    /// caller to feed into its breaker-transition counter).
    pub async fn on_success(&self, admitted: Admitted) -> bool {
        let mut st = self.state.write().await;
        if admitted.was_probe && st.half_open_inflight > 0 {
            st.half_open_inflight -= 1;
        }
        match st.state {
            CircuitState::Closed => {
                st.failure_count = 0;
                false
            }
            CircuitState::HalfOpen => {
                st.state = CircuitState::Closed;
                st.failure_count = 0;
                st.half_open_inflight = 0;
                st.recovery_deadline = None;
                tracing::info!(adapter = %self.name, "circuit breaker HalfOpen -> Closed");
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Record a failed attempt. `kind` decides whether the breaker is even
    /// eligible to move: `PermanentClient` never trips the breaker (it's a
    /// caller error, not a backend fault). Returns `true` if this call
    /// caused a state transition.
    pub async fn on_failure(&self, admitted: Admitted, kind: FailureKind) -> bool {
        let mut st = self.state.write().await;
        if admitted.was_probe && st.half_open_inflight > 0 {
            st.half_open_inflight -= 1;
        }
        if kind == FailureKind::PermanentClient {
            return false;
        }
        let now = Instant::now();
        match st.state {
            CircuitState::Closed => {
                if let Some(last) = st.last_failure_time {
                    if now.duration_since(last) > self.config.monitoring_period {
                        st.failure_count = 0;
                    }
                }
                st.failure_count += 1;
                st.last_failure_time = Some(now);
                if st.failure_count >= self.config.failure_threshold {
                    st.state = CircuitState::Open;
                    st.recovery_deadline = Some(now + self.config.recovery_timeout);
                    tracing::warn!(
                        adapter = %self.name,
                        failures = st.failure_count,
                        "circuit breaker Closed -> Open"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                st.state = CircuitState::Open;
                st.recovery_deadline = Some(now + self.config.recovery_timeout);
                st.last_failure_time = Some(now);
                st.half_open_inflight = 0;
                tracing::warn!(adapter = %self.name, "circuit breaker HalfOpen -> Open");
                true
            }
            CircuitState::Open => {
                st.last_failure_time = Some(now);
                false
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn force_open(&self) {
        let mut st = self.state.write().await;
        st.state = CircuitState::Open;
        st.recovery_deadline = Some(Instant::now() + self.config.recovery_timeout);
    }

    pub async fn force_closed(&self) {
        let mut st = self.state.write().await;
        *st = State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
            half_open_max_probes: 1,
            monitoring_period: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn closed_allows_calls_and_resets_on_success() {
        let cb = CircuitBreaker::new("a", cfg(2, 1_000));
        let lease = cb.try_acquire().await.unwrap();
        cb.on_success(lease).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_transient_failures() {
        let cb = CircuitBreaker::new("a", cfg(2, 1_000));
        for _ in 0..2 {
            let lease = cb.try_acquire().await.unwrap();
            cb.on_failure(lease, FailureKind::Transient).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn permanent_client_failures_never_trip_breaker() {
        let cb = CircuitBreaker::new("a", cfg(1, 1_000));
        let lease = cb.try_acquire().await.unwrap();
        cb.on_failure(lease, FailureKind::PermanentClient).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open_on_success() {
        let cb = CircuitBreaker::new("a", cfg(1, 50));
        let lease = cb.try_acquire().await.unwrap();
        cb.on_failure(lease, FailureKind::Transient).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let lease = cb.try_acquire().await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.on_success(lease).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_rejects_beyond_max_probes() {
        let cb = CircuitBreaker::new("a", cfg(1, 10));
        let lease = cb.try_acquire().await.unwrap();
        cb.on_failure(lease, FailureKind::Transient).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _probe = cb.try_acquire().await.unwrap();
        assert!(cb.try_acquire().await.is_err());
    }
}
