//! # Configuration
//!
//! TOML-based configuration for the router and pool, with environment
//! variable overrides, following the same `Config::load` / `validate` /
//! `apply_env_overrides` shape the rest of this workspace's ancestry uses
//! for its gateway configuration.
//!
//! Holds: adapter descriptors, router weights, circuit breaker defaults,
//! cache bounds, pool sizing/thresholds, the worker command line and ready
//! sentinel, and the server bind address.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use relay_core::circuit_breaker::CircuitBreakerConfig;
use relay_core::http_adapter::AuthStrategy;
use relay_core::router::RouterWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "relay_core::common::duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterDef {
    pub name: String,
    /// `http` backends carry a base URL; `echo` is the dependency-free
    /// local backend used for smoke-testing and `demos/`.
    pub kind: AdapterKind,
    pub base_url: Option<String>,
    pub complete_path: String,
    pub health_path: String,
    pub api_key_env: Option<String>,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub typical_latency_ms: u64,
    pub concurrency_cap: u32,
    pub quality_rating: f64,
    /// math, code, reasoning, language_en, language_other, short, long
    pub task_affinities: [f64; 7],
    #[serde(with = "relay_core::common::duration_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    #[default]
    Echo,
    Http,
}

impl Default for AdapterDef {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            kind: AdapterKind::Echo,
            base_url: None,
            complete_path: "/v1/complete".to_string(),
            health_path: "/healthz".to_string(),
            api_key_env: None,
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

impl AdapterDef {
    pub fn auth_strategy(&self) -> AuthStrategy {
        match &self.api_key_env {
            Some(var) => match env::var(var) {
                Ok(token) if !token.is_empty() => AuthStrategy::Bearer(token),
                _ => AuthStrategy::None,
            },
            None => AuthStrategy::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfigDef {
    pub weights: RouterWeights,
    pub reference_latency_ms: f64,
    pub preferred_bonus: f64,
    #[serde(with = "relay_core::common::duration_serde")]
    pub retry_base_delay: Duration,
}

impl Default for RouterConfigDef {
    fn default() -> Self {
        let defaults = relay_core::router::RouterConfig::default();
        Self {
            weights: defaults.weights,
            reference_latency_ms: defaults.reference_latency_ms,
            preferred_bonus: defaults.preferred_bonus,
            retry_base_delay: defaults.retry_base_delay,
        }
    }
}

impl From<RouterConfigDef> for relay_core::router::RouterConfig {
    fn from(def: RouterConfigDef) -> Self {
        relay_core::router::RouterConfig {
            weights: def.weights,
            reference_latency_ms: def.reference_latency_ms,
            preferred_bonus: def.preferred_bonus,
            retry_base_delay: def.retry_base_delay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigDef {
    #[serde(with = "relay_core::common::duration_serde")]
    pub ttl: Duration,
    pub max_size_bytes: usize,
    pub max_entries: usize,
}

impl Default for CacheConfigDef {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size_bytes: 64 * 1024 * 1024,
            max_entries: 10_000,
        }
    }
}

impl From<CacheConfigDef> for relay_core::cache::CacheConfig {
    fn from(def: CacheConfigDef) -> Self {
        relay_core::cache::CacheConfig {
            ttl: def.ttl,
            max_size_bytes: def.max_size_bytes,
            max_entries: def.max_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfigDef {
    #[serde(with = "relay_core::common::duration_serde")]
    pub check_interval: Duration,
    #[serde(with = "relay_core::common::duration_serde")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfigDef {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(8),
        }
    }
}

/// The MCP worker pool's configuration. `worker_command` and
/// `worker_args` describe how to spawn one worker process; `ready_sentinel`
/// is the literal token agreed with the worker (default
/// `MCP_RAG_READY`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfigDef {
    pub worker_command: String,
    pub worker_args: Vec<String>,
    pub ready_sentinel: String,
    #[serde(with = "relay_core::common::duration_serde")]
    pub startup_timeout: Duration,
    pub min_instances: usize,
    pub max_instances: usize,
    pub max_concurrent_per_worker: usize,
    #[serde(with = "relay_core::common::duration_serde")]
    pub request_timeout: Duration,
    pub queue_limit: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    #[serde(with = "relay_core::common::duration_serde")]
    pub scale_cooldown: Duration,
    #[serde(with = "relay_core::common::duration_serde")]
    pub scale_tick_interval: Duration,
    pub worker_failure_threshold: u32,
    #[serde(with = "relay_core::common::duration_serde")]
    pub orphan_grace: Duration,
}

impl Default for PoolConfigDef {
    fn default() -> Self {
        Self {
            worker_command: "mcp-rag-worker".to_string(),
            worker_args: Vec::new(),
            ready_sentinel: "MCP_RAG_READY".to_string(),
            startup_timeout: Duration::from_secs(15),
            min_instances: 2,
            max_instances: 6,
            max_concurrent_per_worker: 3,
            request_timeout: Duration::from_secs(90),
            queue_limit: 30,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_cooldown: Duration::from_secs(30),
            scale_tick_interval: Duration::from_secs(10),
            worker_failure_threshold: 3,
            orphan_grace: Duration::from_secs(5),
        }
    }
}

impl From<PoolConfigDef> for relay_pool::PoolConfig {
    fn from(def: PoolConfigDef) -> Self {
        relay_pool::PoolConfig {
            worker_command: def.worker_command,
            worker_args: def.worker_args,
            ready_sentinel: def.ready_sentinel,
            startup_timeout: def.startup_timeout,
            min_instances: def.min_instances,
            max_instances: def.max_instances,
            max_concurrent_per_worker: def.max_concurrent_per_worker,
            request_timeout: def.request_timeout,
            queue_limit: def.queue_limit,
            scale_up_threshold: def.scale_up_threshold,
            scale_down_threshold: def.scale_down_threshold,
            scale_cooldown: def.scale_cooldown,
            scale_tick_interval: def.scale_tick_interval,
            worker_failure_threshold: def.worker_failure_threshold,
            orphan_grace: def.orphan_grace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub adapters: Vec<AdapterDef>,
    pub router: RouterConfigDef,
    pub circuit_breaker: CircuitBreakerConfigDef,
    pub health: HealthConfigDef,
    pub cache: CacheConfigDef,
    pub pool: PoolConfigDef,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            adapters: vec![AdapterDef {
                name: "local-echo".to_string(),
                kind: AdapterKind::Echo,
                ..AdapterDef::default()
            }],
            router: RouterConfigDef::default(),
            circuit_breaker: CircuitBreakerConfigDef::default(),
            health: HealthConfigDef::default(),
            cache: CacheConfigDef::default(),
            pool: PoolConfigDef::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigDef {
    pub failure_threshold: u32,
    #[serde(with = "relay_core::common::duration_serde")]
    pub recovery_timeout: Duration,
    pub half_open_max_probes: u32,
    #[serde(with = "relay_core::common::duration_serde")]
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfigDef {
    fn default() -> Self {
        let d = CircuitBreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            recovery_timeout: d.recovery_timeout,
            half_open_max_probes: d.half_open_max_probes,
            monitoring_period: d.monitoring_period,
        }
    }
}

impl From<CircuitBreakerConfigDef> for CircuitBreakerConfig {
    fn from(def: CircuitBreakerConfigDef) -> Self {
        CircuitBreakerConfig {
            failure_threshold: def.failure_threshold,
            recovery_timeout: def.recovery_timeout,
            half_open_max_probes: def.half_open_max_probes,
            monitoring_period: def.monitoring_period,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("RELAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("RELAY_PORT") {
            self.server.port = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid RELAY_PORT: {port_str}"))?;
        }
        if let Ok(level) = env::var("RUST_LOG") {
            if !level.is_empty() {
                self.log_level = level;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("server host cannot be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("server port must be between 1 and 65535");
        }
        if self.pool.min_instances == 0 {
            anyhow::bail!("pool.min_instances must be at least 1");
        }
        if self.pool.min_instances > self.pool.max_instances {
            anyhow::bail!("pool.min_instances cannot exceed pool.max_instances");
        }
        if self.pool.max_concurrent_per_worker == 0 {
            anyhow::bail!("pool.max_concurrent_per_worker must be at least 1");
        }
        if !(0.0..1.0).contains(&self.pool.scale_down_threshold)
            || !(0.0..=1.0).contains(&self.pool.scale_up_threshold)
            || self.pool.scale_down_threshold >= self.pool.scale_up_threshold
        {
            anyhow::bail!("pool scale thresholds must satisfy 0 <= down < up <= 1");
        }
        for adapter in &self.adapters {
            if adapter.name.is_empty() {
                anyhow::bail!("adapter name cannot be empty");
            }
            if adapter.kind == AdapterKind::Http && adapter.base_url.is_none() {
                anyhow::bail!("http adapter '{}' requires base_url", adapter.name);
            }
        }
        Ok(())
    }

    /// Metadata map the `/health` handler uses to report per-adapter
    /// static facts alongside the router's live health snapshot.
    pub fn adapter_names(&self) -> HashMap<String, AdapterDef> {
        self.adapters
            .iter()
            .cloned()
            .map(|a| (a.name.clone(), a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn min_exceeding_max_instances_is_rejected() {
        let mut config = Config::default();
        config.pool.min_instances = 10;
        config.pool.max_instances = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn http_adapter_without_base_url_is_rejected() {
        let mut config = Config::default();
        config.adapters.push(AdapterDef {
            name: "remote".to_string(),
            kind: AdapterKind::Http,
            base_url: None,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }
}
