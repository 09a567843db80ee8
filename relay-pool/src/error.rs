//! Stable, machine-readable error kinds for the pool half,
//! mirroring `relay_core::error::RouterError`'s shape without depending on
//! `relay-core` (this crate multiplexes MCP workers; it does not call
//! backend adapters).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeadlineExceeded,
    Overloaded,
    WorkerStartupFailed,
    WorkerCrashed,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
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

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("[pool] deadline exceeded")]
    DeadlineExceeded,

    #[error("[pool] overloaded: queue limit reached")]
    Overloaded,

    #[error("[pool] worker failed to start: {message}")]
    WorkerStartupFailed { message: String },

    #[error("[pool] worker crashed: {message}")]
    WorkerCrashed { message: String },

    #[error("[pool] internal error: {message}")]
    Internal { message: String },
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            PoolError::Overloaded => ErrorKind::Overloaded,
            PoolError::WorkerStartupFailed { .. } => ErrorKind::WorkerStartupFailed,
            PoolError::WorkerCrashed { .. } => ErrorKind::WorkerCrashed,
            PoolError::Internal { .. } => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
