//! Relay Pool — MCP Worker Process Supervisor and Multiplexer
//!
//! This crate owns the lifecycle of a fleet of MCP worker child processes
//! and multiplexes JSON-RPC requests across them. It is independent of
//! `relay-core`: the router picks *which backend* to call, while this
//! crate manages *how many workers* handle the resulting MCP-protocol
//! traffic and how requests are load-balanced, retried once on crash, and
//! auto-scaled against demand.
//!
//! - [`worker`] — process supervisor (C7): spawn, ready-sentinel
//!   detection, newline-framed JSON-RPC stdio.
//! - [`pool`] — multiplexer (C8): FIFO admission queue, least-connections
//!   dispatch, id rewriting, deadline/orphan-grace handling, worker-level
//!   circuit breaking, auto-scaling.
//! - [`metrics`] — in-memory counters and histograms for queueing and
//!   scaling behavior.
//! - [`error`] — stable, machine-readable error kinds.

pub mod error;
pub mod metrics;
pub mod pool;
pub mod worker;

pub use error::{ErrorKind, PoolError, Result};
pub use metrics::PoolMetricsCollector;
pub use pool::{JsonRpcRequest, JsonRpcResponse, Pool, PoolConfig, PoolSnapshot};
pub use worker::WorkerState;
