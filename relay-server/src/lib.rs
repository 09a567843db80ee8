//! `relay-server`: the binary crate that wires `relay-core` (backend
//! router) and `relay-pool` (MCP worker pool) together behind an HTTP and
//! CLI surface.
//!
//! ## Architecture
//!
//! - [`config`] — TOML configuration with environment variable overrides.
//! - [`server`] — `AppState` and the axum router (`/api/optimize`,
//!   `/health`, `/metrics`).
//! - [`handlers`] — request handlers backing the routes above.
//! - [`metrics`] — Prometheus-text rendering combining the router's and
//!   pool's metrics snapshots.
//!
//! The binary itself (`main.rs`) owns CLI argument parsing, process-wide
//! `tracing` initialization, and the two-phase graceful shutdown.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod server;

pub use server::{app_from_state, build_state, create_server, AppState};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    /// The default config's pool wants to spawn real `mcp-rag-worker`
    /// processes; these HTTP-layer tests only exercise the router path, so
    /// they run the pool at zero instances rather than require that binary
    /// to be present on the test machine.
    fn test_config() -> Config {
        let mut config = Config::default();
        config.pool.min_instances = 0;
        config.pool.max_instances = 0;
        config
    }

    #[tokio::test]
    async fn health_check_reports_ok_with_default_config() {
        let app = create_server(test_config()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["status"], "ok");
        assert!(body["backends"].is_array());
        assert!(body["pool"].is_object());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_text() {
        let app = create_server(test_config()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/metrics").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.text();
        assert!(body.contains("relay_requests_total"));
    }

    #[tokio::test]
    async fn optimize_echo_roundtrip() {
        let app = create_server(test_config()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/api/optimize")
            .json(&serde_json::json!({"prompt": "hello"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["backend_used"], "local-echo");
    }

    #[tokio::test]
    async fn optimize_rejects_empty_prompt() {
        let app = create_server(test_config()).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/api/optimize")
            .json(&serde_json::json!({"prompt": ""}))
            .expect_failure()
            .await;
        assert!(response.status_code().is_client_error());
    }
}
