//! # Relay Core — Backend Router
//!
//! The request-routing half of an AI middleware: given a prompt and
//! optional hints, select one healthy backend adapter from a registered
//! set using a task-aware, cost/latency/availability-weighted score,
//! issue the request, handle failures with circuit breaking and
//! fallback, and record the outcome.
//!
//! This crate does not listen on a socket and does not know about HTTP,
//! MCP, or the CLI — those live in `relay-server`, which constructs a
//! [`router::Router`] once at startup and drives it per request.
//!
//! ## Module map
//!
//! - [`models`] — `Request`/`Response` data model.
//! - [`adapter`] — the `Adapter` capability trait, per-adapter rolling
//!   stats, and the startup-time `AdapterRegistry`.
//! - [`circuit_breaker`] — per-adapter failure gate with half-open probing.
//! - [`health`] — periodic liveness/latency sampling, orthogonal to the
//!   breaker.
//! - [`classifier`] — deterministic prompt -> task-axis scoring.
//! - [`router`] — the scoring formula, selection, and retry/fallback loop.
//! - [`cache`] — fingerprinted response memo with TTL and LRU eviction.
//! - [`metrics`] — in-memory counters and histograms.
//! - [`http_adapter`] / [`echo_adapter`] — two concrete `Adapter`
//!   implementations: a generic HTTP backend and a dependency-free echo
//!   backend for local development and tests.
//! - [`error`] — the stable, machine-readable error kinds.
//!
//! ## Quick start
//!
//! ```
//! use relay_core::adapter::{AdapterConfig, AdapterEntry, AdapterRegistry};
//! use relay_core::cache::ResponseCache;
//! use relay_core::circuit_breaker::CircuitBreakerConfig;
//! use relay_core::echo_adapter::EchoAdapter;
//! use relay_core::metrics::MetricsCollector;
//! use relay_core::models::Request;
//! use relay_core::router::{Router, RouterConfig};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let mut registry = AdapterRegistry::new();
//! registry.register(AdapterEntry::new(
//!     AdapterConfig::new("A"),
//!     Box::new(EchoAdapter::new("A")),
//!     CircuitBreakerConfig::default(),
//! ));
//!
//! let router = Router::new(
//!     Arc::new(registry),
//!     Arc::new(ResponseCache::new(Default::default())),
//!     Arc::new(MetricsCollector::new()),
//!     RouterConfig::default(),
//! );
//!
//! let response = router.optimize(Request::new("ping")).await.unwrap();
//! assert_eq!(response.content, "ping");
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod circuit_breaker;
pub mod classifier;
pub mod common;
pub mod echo_adapter;
pub mod error;
pub mod health;
pub mod http_adapter;
pub mod metrics;
pub mod models;
pub mod router;

pub use adapter::{Adapter, AdapterConfig, AdapterEntry, AdapterRegistry};
pub use cache::{CacheConfig, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::{classify, Classification};
pub use error::{ErrorKind, RouterError};
pub use metrics::MetricsCollector;
pub use models::{Priority, Request, RequestOptions, Response};
pub use router::{Router, RouterConfig, RouterWeights};

/// Result type for router-core operations.
pub type Result<T> = std::result::Result<T, RouterError>;
