//! Request/response data model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Caller-supplied options. `preferred_backend` is a hint only (see the
/// router's `preferred_backend` handling) and is deliberately excluded from
/// the cache fingerprint.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub bypass_cache: bool,
    pub preferred_backend: Option<String>,
    pub priority: Priority,
    /// Absolute deadline; `None` means no deadline.
    pub deadline: Option<Instant>,
    pub max_retries: u32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            bypass_cache: false,
            preferred_backend: None,
            priority: Priority::Medium,
            deadline: None,
            max_retries: 3,
        }
    }
}

/// Immutable once admitted.
#[derive(Debug, Clone)]
pub struct Request {
    pub prompt: String,
    pub attachments: Vec<Vec<u8>>,
    pub options: RequestOptions,
}

impl Request {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: Vec::new(),
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.options
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_past_deadline(&self) -> bool {
        matches!(self.options.deadline, Some(d) if Instant::now() >= d)
    }
}

/// Emitted once per request (at most one successful
/// adapter response is observable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub backend_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_match_documented_values() {
        let req = Request::new("ping");
        assert_eq!(req.options.max_retries, 3);
        assert_eq!(req.options.priority, Priority::Medium);
        assert!(!req.options.bypass_cache);
        assert!(req.options.deadline.is_none());
    }

    #[test]
    fn zero_deadline_is_immediately_past() {
        let mut req = Request::new("ping");
        req.options.deadline = Some(Instant::now() - std::time::Duration::from_millis(1));
        assert!(req.is_past_deadline());
    }
}
