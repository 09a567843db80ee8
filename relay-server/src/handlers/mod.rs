//! HTTP request handlers backing the three routes in [`crate::server`]:
//! `POST /api/optimize`, `GET /health`, `GET /metrics`.
//!
//! Status-code mapping for `/api/optimize`: 200 on
//! success, 4xx for validation/`PermanentClient`, 503 for
//! `NoHealthyBackend`/`Overloaded` (with `Retry-After` where known), 504
//! for `DeadlineExceeded`.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;
use serde::{Deserialize, Serialize};

use relay_core::{ErrorKind, Priority, Request, RequestOptions, Response as CoreResponse, RouterError};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct OptimizeRequestBody {
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub options: Option<OptimizeOptionsBody>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OptimizeOptionsBody {
    #[serde(default)]
    pub bypass_cache: bool,
    #[serde(default)]
    pub preferred_backend: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Deadline expressed as a relative budget in milliseconds from the
    /// moment the request is admitted.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn parse_priority(raw: &str) -> Option<Priority> {
    match raw {
        "high" => Some(Priority::High),
        "medium" => Some(Priority::Medium),
        "low" => Some(Priority::Low),
        _ => None,
    }
}

struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    retry_after_ms: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> AxumResponse {
        let body = serde_json::json!({ "error": self.kind, "message": self.message });
        let mut response = (self.status, Json(body)).into_response();
        if let Some(ms) = self.retry_after_ms {
            let seconds = ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

fn router_error_to_api_error(err: RouterError) -> ApiError {
    let retry_after_ms = match &err {
        RouterError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
        _ => None,
    };
    let status = match err.kind() {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::NoHealthyBackend | ErrorKind::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RateLimited | ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::WorkerStartupFailed | ErrorKind::WorkerCrashed | ErrorKind::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    ApiError {
        status,
        kind: err.kind().as_str(),
        message: err.to_string(),
        retry_after_ms,
    }
}

/// `POST /api/optimize`: decode the envelope, admit it to the router, and
/// translate the outcome (or a local validation failure) into the status
/// codes below.
pub async fn optimize(
    State(state): State<AppState>,
    Json(body): Json<OptimizeRequestBody>,
) -> Result<Json<CoreResponse>, ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::ValidationError.as_str(),
            message: "prompt must not be empty".to_string(),
            retry_after_ms: None,
        });
    }

    let mut options = RequestOptions::default();
    if let Some(raw) = body.options {
        options.bypass_cache = raw.bypass_cache;
        options.preferred_backend = raw.preferred_backend;
        if let Some(priority) = raw.priority.as_deref().and_then(parse_priority) {
            options.priority = priority;
        }
        if let Some(retries) = raw.max_retries {
            options.max_retries = retries;
        }
        if let Some(ms) = raw.deadline_ms {
            options.deadline = Some(Instant::now() + Duration::from_millis(ms));
        }
    }

    let mut request = Request::new(body.prompt).with_options(options);
    request.attachments = body.attachments.into_iter().map(String::into_bytes).collect();

    state
        .router
        .optimize(request)
        .await
        .map(Json)
        .map_err(router_error_to_api_error)
}

#[derive(Debug, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PoolHealth {
    pub ready: usize,
    pub busy: usize,
    pub queued: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backends: Vec<BackendHealth>,
    pub pool: PoolHealth,
}

/// `GET /health`: `{status, backends, pool}`. `status` is
/// `ok` when every backend is healthy, `down` when none are, `degraded`
/// otherwise.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backends: Vec<BackendHealth> = state
        .router
        .registry()
        .all()
        .map(|entry| BackendHealth {
            name: entry.name().to_string(),
            healthy: entry.stats.is_healthy(),
            latency_ms: entry.stats.last_probe_latency_ms(),
        })
        .collect();

    let healthy_count = backends.iter().filter(|b| b.healthy).count();
    let status = if backends.is_empty() || healthy_count == 0 {
        "down"
    } else if healthy_count == backends.len() {
        "ok"
    } else {
        "degraded"
    };

    let pool_snapshot = state.pool.snapshot().await;
    Json(HealthResponse {
        status,
        backends,
        pool: PoolHealth {
            ready: pool_snapshot.ready,
            busy: pool_snapshot.busy,
            queued: pool_snapshot.queued,
        },
    })
}

/// `GET /metrics`: the router's and pool's metrics snapshots rendered as
/// Prometheus exposition text.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let router_snapshot = state.router.metrics().snapshot();
    let pool_snapshot = state.pool.metrics().snapshot();
    let body = crate::metrics::render_prometheus(&router_snapshot, &pool_snapshot, state.started_at.elapsed());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
