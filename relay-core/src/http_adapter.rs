//! Generic HTTP backend adapter.
//!
//! One adapter per configured backend. Each backend is treated as an
//! opaque capability: the adapter POSTs a minimal, adapter-agnostic JSON
//! envelope (`{prompt, attachments, options}` in, `{content, input_tokens,
//! output_tokens, metadata}` out) and classifies the HTTP outcome into the
//! failure taxonomy the router and circuit breaker understand. This
//! crate does not speak any upstream vendor's wire format — that
//! translation, if a real backend needs one, lives behind this same
//! trait in an adapter the operator supplies.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::adapter::{Adapter, ProbeResult};
use crate::error::AdapterError;
use crate::models::{Request, Response};

#[derive(Debug, Clone)]
pub enum AuthStrategy {
    Bearer(String),
    Header { name: String, value: String },
    None,
}

#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub name: String,
    pub base_url: String,
    /// Path the chat/completion envelope is POSTed to, e.g. `/v1/complete`.
    pub complete_path: String,
    /// Path probed by `health_probe`, e.g. `/healthz`.
    pub health_path: String,
    pub auth: AuthStrategy,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    prompt: &'a str,
    attachments: Vec<String>,
    priority: &'static str,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    content: String,
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cost_usd: f64,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

pub struct HttpAdapter {
    name: String,
    http: Client,
    base_url: String,
    complete_path: String,
    health_path: String,
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Result<Self, AdapterError> {
        let mut builder = Client::builder().timeout(config.request_timeout);
        let mut default_headers = reqwest::header::HeaderMap::new();
        match &config.auth {
            AuthStrategy::Bearer(token) => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    default_headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) = (
                    name.parse::<reqwest::header::HeaderName>(),
                    value.parse(),
                ) {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::None => {}
        }
        builder = builder.default_headers(default_headers);
        let http = builder.build().map_err(|e| AdapterError::PermanentClient {
            message: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            name: config.name,
            http,
            base_url: config.base_url,
            complete_path: config.complete_path,
            health_path: config.health_path,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }
}

/// Maps an HTTP outcome to the adapter failure taxonomy.
fn classify_status(status: StatusCode, retry_after_ms: Option<u64>) -> Option<AdapterError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(AdapterError::RateLimited { retry_after_ms });
    }
    if status.is_client_error() {
        return Some(AdapterError::PermanentClient {
            message: format!("http {status}"),
        });
    }
    Some(AdapterError::PermanentServer {
        message: format!("http {status}"),
    })
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &Request) -> Result<Response, AdapterError> {
        let envelope = OutboundEnvelope {
            prompt: &request.prompt,
            attachments: request
                .attachments
                .iter()
                .map(|bytes| format!("{} bytes", bytes.len()))
                .collect(),
            priority: match request.options.priority {
                crate::models::Priority::High => "high",
                crate::models::Priority::Medium => "medium",
                crate::models::Priority::Low => "low",
            },
        };

        let started = Instant::now();
        let resp = self
            .http
            .post(self.url(&self.complete_path))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Transient {
                        message: "request timed out".to_string(),
                    }
                } else {
                    AdapterError::Transient {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        let retry_after_ms = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| secs * 1000);

        if let Some(err) = classify_status(status, retry_after_ms) {
            return Err(err);
        }

        let body: InboundEnvelope = resp.json().await.map_err(|e| AdapterError::Transient {
            message: format!("malformed response body: {e}"),
        })?;

        Ok(Response {
            content: body.content,
            backend_used: self.name.clone(),
            input_tokens: body.input_tokens,
            output_tokens: body.output_tokens,
            cost_usd: body.cost_usd,
            latency_ms: started.elapsed().as_millis() as u64,
            cache_hit: false,
            metadata: body.metadata,
        })
    }

    async fn health_probe(&self) -> Result<ProbeResult, AdapterError> {
        let started = Instant::now();
        let resp = self
            .http
            .get(self.url(&self.health_path))
            .send()
            .await
            .map_err(|e| AdapterError::Transient {
                message: e.to_string(),
            })?;
        Ok(ProbeResult {
            ok: resp.status().is_success(),
            latency: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_throttling_as_rate_limited() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(1000)).unwrap();
        assert_eq!(err.kind(), crate::error::FailureKind::RateLimited);
        assert_eq!(err.retry_after_ms(), Some(1000));
    }

    #[test]
    fn classifies_other_4xx_as_permanent_client() {
        let err = classify_status(StatusCode::BAD_REQUEST, None).unwrap();
        assert_eq!(err.kind(), crate::error::FailureKind::PermanentClient);
    }

    #[test]
    fn classifies_5xx_as_permanent_server() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, None).unwrap();
        assert_eq!(err.kind(), crate::error::FailureKind::PermanentServer);
    }

    #[test]
    fn success_status_classifies_to_none() {
        assert!(classify_status(StatusCode::OK, None).is_none());
    }

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_config(base_url: String) -> HttpAdapterConfig {
        HttpAdapterConfig {
            name: "mock-backend".to_string(),
            base_url,
            complete_path: "/v1/complete".to_string(),
            health_path: "/healthz".to_string(),
            auth: AuthStrategy::Bearer("secret-token".to_string()),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn send_round_trips_through_a_live_http_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "hello from mock",
                "input_tokens": 3,
                "output_tokens": 5,
                "cost_usd": 0.001,
            })))
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(adapter_config(server.uri())).unwrap();
        let response = adapter.send(&Request::new("hi")).await.unwrap();
        assert_eq!(response.content, "hello from mock");
        assert_eq!(response.input_tokens, 3);
        assert_eq!(response.backend_used, "mock-backend");
        assert!(!response.cache_hit);
    }

    #[tokio::test]
    async fn send_classifies_rate_limit_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(adapter_config(server.uri())).unwrap();
        let err = adapter.send(&Request::new("hi")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::RateLimited);
        assert_eq!(err.retry_after_ms(), Some(2000));
    }

    #[tokio::test]
    async fn health_probe_reports_ok_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(adapter_config(server.uri())).unwrap();
        let probe = adapter.health_probe().await.unwrap();
        assert!(probe.ok);
    }

    #[tokio::test]
    async fn health_probe_reports_not_ok_on_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(adapter_config(server.uri())).unwrap();
        let probe = adapter.health_probe().await.unwrap();
        assert!(!probe.ok);
    }
}
