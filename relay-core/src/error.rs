//! Error types for the router core.
//!
//! Mirrors a `ClientError`/`ProviderError` split: adapters
//! raise a small `AdapterError`, and the router converts it (plus its own
//! failures) into `RouterError`, whose [`ErrorKind`] is the stable,
//! machine-readable tag external callers match on.

use thiserror::Error;

/// Stable, testable error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    NoHealthyBackend,
    BackendUnavailable,
    RateLimited,
    DeadlineExceeded,
    Overloaded,
    WorkerStartupFailed,
    WorkerCrashed,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NoHealthyBackend => "NoHealthyBackend",
            ErrorKind::BackendUnavailable => "BackendUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::Overloaded => "Overloaded",
            ErrorKind::WorkerStartupFailed => "WorkerStartupFailed",
            ErrorKind::WorkerCrashed => "WorkerCrashed",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an adapter failure. Drives both the
/// circuit breaker (which failures count toward tripping it) and the
/// router's retry loop (which failures are retryable at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    RateLimited,
    PermanentClient,
    PermanentServer,
}

/// Error raised by an adapter call, already classified into a failure kind.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient backend error: {message}")]
    Transient { message: String },
    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("permanent client error: {message}")]
    PermanentClient { message: String },
    #[error("permanent server error: {message}")]
    PermanentServer { message: String },
}

impl AdapterError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::Transient { .. } => FailureKind::Transient,
            AdapterError::RateLimited { .. } => FailureKind::RateLimited,
            AdapterError::PermanentClient { .. } => FailureKind::PermanentClient,
            AdapterError::PermanentServer { .. } => FailureKind::PermanentServer,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AdapterError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Top-level error returned by the router, carrying the failing component
/// name and a stable [`ErrorKind`].
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("[{component}] validation error: {message}")]
    Validation { component: String, message: String },

    #[error("[router] no healthy backend available")]
    NoHealthyBackend,

    #[error("[{adapter}] backend unavailable (circuit open)")]
    BackendUnavailable { adapter: String },

    #[error("[{adapter}] rate limited")]
    RateLimited {
        adapter: String,
        retry_after_ms: Option<u64>,
    },

    #[error("[router] deadline exceeded")]
    DeadlineExceeded,

    #[error("[pool] overloaded")]
    Overloaded,

    #[error("[{component}] internal error: {message}")]
    Internal { component: String, message: String },
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::Validation { .. } => ErrorKind::ValidationError,
            RouterError::NoHealthyBackend => ErrorKind::NoHealthyBackend,
            RouterError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            RouterError::RateLimited { .. } => ErrorKind::RateLimited,
            RouterError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            RouterError::Overloaded => ErrorKind::Overloaded,
            RouterError::Internal { .. } => ErrorKind::InternalError,
        }
    }

    pub fn component(&self) -> &str {
        match self {
            RouterError::Validation { component, .. } => component,
            RouterError::NoHealthyBackend => "router",
            RouterError::BackendUnavailable { adapter } => adapter,
            RouterError::RateLimited { adapter, .. } => adapter,
            RouterError::DeadlineExceeded => "router",
            RouterError::Overloaded => "pool",
            RouterError::Internal { component, .. } => component,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
