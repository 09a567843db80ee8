//! In-memory echo adapter: a deterministic, dependency-free backend used
//! for local development, the CLI's smoke-test mode, and the router's own
//! test suite (single healthy adapter `A`, here named "echo").

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{Adapter, ProbeResult};
use crate::error::AdapterError;
use crate::models::{Request, Response};

pub struct EchoAdapter {
    name: String,
    simulated_latency: Duration,
}

impl EchoAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            simulated_latency: Duration::ZERO,
        }
    }

    pub fn with_simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = latency;
        self
    }
}

#[async_trait]
impl Adapter for EchoAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &Request) -> Result<Response, AdapterError> {
        if !self.simulated_latency.is_zero() {
            tokio::time::sleep(self.simulated_latency).await;
        }
        Ok(Response {
            content: request.prompt.clone(),
            backend_used: self.name.clone(),
            input_tokens: request.prompt.split_whitespace().count() as u32,
            output_tokens: request.prompt.split_whitespace().count() as u32,
            cost_usd: 0.0,
            latency_ms: self.simulated_latency.as_millis() as u64,
            cache_hit: false,
            metadata: HashMap::new(),
        })
    }

    async fn health_probe(&self) -> Result<ProbeResult, AdapterError> {
        Ok(ProbeResult {
            ok: true,
            latency: self.simulated_latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_prompt_verbatim() {
        let adapter = EchoAdapter::new("A");
        let resp = adapter.send(&Request::new("ping")).await.unwrap();
        assert_eq!(resp.content, "ping");
        assert_eq!(resp.backend_used, "A");
    }
}
