//! Health monitor: periodic liveness + latency sampling,
//! orthogonal to circuit breaker state. Health tracks *reachability*; the
//! breaker tracks *recent call behavior*. Neither one drives the other.

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::AdapterRegistry;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            // Deliberately looser than per-call timeouts to avoid false
            // positives while a backend is warming up.
            probe_timeout: Duration::from_secs(8),
        }
    }
}

/// Runs health probes against every registered adapter on a fixed interval
/// until `shutdown` fires. Intended to be spawned once at startup and
/// joined during the two-phase shutdown drain.
pub async fn run(
    registry: Arc<AdapterRegistry>,
    config: HealthMonitorConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                probe_all(&registry, config.probe_timeout).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn probe_all(registry: &AdapterRegistry, timeout: Duration) {
    let entries: Vec<_> = registry.all().cloned().collect();
    let probes = entries.into_iter().map(|entry| async move {
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, entry.adapter.health_probe()).await;
        match outcome {
            Ok(Ok(result)) => {
                entry.stats.record_probe(&result);
                if !result.ok {
                    tracing::warn!(adapter = entry.name(), "health probe reported unhealthy");
                }
            }
            Ok(Err(err)) => {
                entry.stats.mark_unhealthy();
                tracing::warn!(adapter = entry.name(), error = %err, "health probe failed");
            }
            Err(_) => {
                entry.stats.mark_unhealthy();
                tracing::warn!(
                    adapter = entry.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "health probe timed out"
                );
            }
        }
    });
    futures::future::join_all(probes).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, AdapterConfig, AdapterEntry, ProbeResult};
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::error::AdapterError;
    use crate::models::{Request, Response};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyAdapter(Arc<AtomicBool>);

    #[async_trait]
    impl Adapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn send(&self, _req: &Request) -> Result<Response, AdapterError> {
            unreachable!()
        }
        async fn health_probe(&self) -> Result<ProbeResult, AdapterError> {
            let healthy = self.0.load(Ordering::SeqCst);
            Ok(ProbeResult {
                ok: healthy,
                latency: Duration::from_millis(10),
            })
        }
    }

    #[tokio::test]
    async fn probe_updates_stats_without_touching_breaker() {
        let flag = Arc::new(AtomicBool::new(false));
        let entry = AdapterEntry::new(
            AdapterConfig::new("flaky"),
            Box::new(FlakyAdapter(flag.clone())),
            CircuitBreakerConfig::default(),
        );
        let mut registry = AdapterRegistry::new();
        registry.register(entry);
        let registry = Arc::new(registry);

        probe_all(&registry, Duration::from_secs(1)).await;
        let entry = registry.get("flaky").unwrap();
        assert!(!entry.stats.is_healthy());
        assert_eq!(
            entry.breaker.state().await,
            crate::circuit_breaker::CircuitState::Closed
        );

        flag.store(true, Ordering::SeqCst);
        probe_all(&registry, Duration::from_secs(1)).await;
        assert!(entry.stats.is_healthy());
    }
}
