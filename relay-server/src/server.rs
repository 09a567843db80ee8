//! HTTP server wiring: builds the adapter registry, router, and pool from
//! a loaded [`Config`], and assembles the axum [`Router`] (`axum::Router`,
//! not to be confused with `relay_core::Router`) exposing
//! `POST /api/optimize`, `GET /health`, and `GET /metrics`.
//!
//! Builds shared state once, wires a middleware stack with
//! `ServiceBuilder`, mounts routes, and returns the assembled `Router`
//! for the caller to serve.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_core::{AdapterConfig, AdapterEntry, AdapterRegistry, MetricsCollector, ResponseCache, Router};
use relay_core::http_adapter::{HttpAdapter, HttpAdapterConfig};
use relay_pool::Pool;

use crate::config::{AdapterKind, Config};
use crate::handlers;

/// Shared application state, cloned cheaply (all fields are `Arc`s) into
/// every handler.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub pool: Arc<Pool>,
    pub config: Arc<Config>,
    pub started_at: std::time::Instant,
    /// Kept alive for the health monitor's lifetime: dropping every sender
    /// handle would make the monitor's `shutdown.changed()` resolve
    /// immediately forever, busy-looping instead of waiting on its ticker.
    health_shutdown_tx: Arc<tokio::sync::watch::Sender<bool>>,
}

fn build_registry(config: &Config) -> anyhow::Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for def in &config.adapters {
        let mut adapter_config = AdapterConfig::new(def.name.clone());
        adapter_config.cost_per_1k_input = def.cost_per_1k_input;
        adapter_config.cost_per_1k_output = def.cost_per_1k_output;
        adapter_config.typical_latency_ms = def.typical_latency_ms;
        adapter_config.concurrency_cap = def.concurrency_cap;
        adapter_config.quality_rating = def.quality_rating;
        adapter_config.task_affinities = def.task_affinities;
        adapter_config.timeout = def.timeout;

        let adapter: Box<dyn relay_core::adapter::Adapter> = match def.kind {
            AdapterKind::Echo => Box::new(relay_core::echo_adapter::EchoAdapter::new(def.name.clone())),
            AdapterKind::Http => {
                let base_url = def
                    .base_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("http adapter '{}' requires base_url", def.name))?;
                Box::new(HttpAdapter::new(HttpAdapterConfig {
                    name: def.name.clone(),
                    base_url,
                    complete_path: def.complete_path.clone(),
                    health_path: def.health_path.clone(),
                    auth: def.auth_strategy(),
                    request_timeout: def.timeout,
                })?)
            }
        };

        registry.register(AdapterEntry::new(
            adapter_config,
            adapter,
            config.circuit_breaker.clone().into(),
        ));
    }
    Ok(registry)
}

/// Builds the router core, the MCP pool, and their background tasks
/// (health monitor, dispatcher, auto-scaler) from a loaded config.
/// Exposed separately from [`create_server`] so `main.rs` can hold onto
/// the `Pool` handle for the two-phase shutdown drain.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let registry = Arc::new(build_registry(&config)?);
    let cache = Arc::new(ResponseCache::new(config.cache.clone().into()));
    let metrics = Arc::new(MetricsCollector::new());
    let router = Arc::new(Router::new(
        registry.clone(),
        cache,
        metrics,
        config.router.clone().into(),
    ));

    let (health_shutdown_tx, health_shutdown_rx) = tokio::sync::watch::channel(false);
    let health_registry = registry.clone();
    let health_config = relay_core::health::HealthMonitorConfig {
        check_interval: config.health.check_interval,
        probe_timeout: config.health.probe_timeout,
    };
    tokio::spawn(async move {
        relay_core::health::run(health_registry, health_config, health_shutdown_rx).await;
    });

    let pool = Pool::new(config.pool.clone().into()).await?;
    pool.run();

    Ok(AppState {
        router,
        pool,
        config: Arc::new(config),
        started_at: std::time::Instant::now(),
        health_shutdown_tx: Arc::new(health_shutdown_tx),
    })
}

impl AppState {
    /// Signals the health monitor background task to stop, as the first
    /// phase of the process's two-phase shutdown drain.
    pub fn stop_health_monitor(&self) {
        let _ = self.health_shutdown_tx.send(true);
    }
}

/// Assembles the axum app (routes + middleware) over a freshly built
/// [`AppState`]. This is the entry point used by tests and by callers
/// that don't need the `Pool` handle back for shutdown.
pub async fn create_server(config: Config) -> anyhow::Result<AxumRouter> {
    let state = build_state(config).await?;
    Ok(app_from_state(state))
}

/// Wires the routes and middleware stack over an already-built state.
pub fn app_from_state(state: AppState) -> AxumRouter {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(120)));

    AxumRouter::new()
        .route("/api/optimize", post(handlers::optimize))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware)
        .with_state(state)
}
