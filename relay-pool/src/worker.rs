//! Worker process supervisor.
//!
//! Spawns one MCP worker process, waits on its stderr for the ready
//! sentinel under a bounded timeout, and owns the newline-framed
//! JSON-RPC stdio channel once the worker is ready. Other stderr lines
//! are logged, never parsed: ad-hoc child-process stdout
//! parsing" is replaced by a framed codec with the sentinel observed on
//! stderr only).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::oneshot;

use crate::error::{PoolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Busy,
    Draining,
    Dead,
}

pub(crate) struct PendingReply {
    pub external_id: Value,
    pub reply_tx: oneshot::Sender<Value>,
}

/// A running (or draining/dead) worker. `in_flight`, `state`, and
/// `ewma_latency_ms` are read by the dispatcher's least-connections pick
/// under the pool's dispatch lock; the stdin/stdout/stderr plumbing runs
/// on independent tasks so request I/O with a worker is parallel.
pub struct Worker {
    pub id: u64,
    state: Mutex<WorkerState>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    in_flight: AtomicUsize,
    failure_count: AtomicU32,
    ewma_latency_ms: Mutex<f64>,
    started_at: Instant,
    last_heartbeat: Mutex<Instant>,
    pub(crate) pending: Mutex<HashMap<u64, PendingReply>>,
    dead: AtomicBool,
}

const EWMA_ALPHA: f64 = 0.3;

impl Worker {
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Relaxed);
        self.set_state(WorkerState::Dead);
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ewma_latency_ms(&self) -> f64 {
        *self.ewma_latency_ms.lock().unwrap()
    }

    fn record_latency(&self, latency_ms: f64) {
        let mut ewma = self.ewma_latency_ms.lock().unwrap();
        *ewma = EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * *ewma;
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock().unwrap()
    }

    pub(crate) fn begin_request(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn end_request(&self, started: Instant) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.record_latency(started.elapsed().as_millis() as f64);
    }

    /// Writes one newline-framed JSON-RPC request to the worker's stdin.
    pub(crate) async fn write_request(&self, body: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(body).map_err(|e| PoolError::Internal {
            message: format!("failed to encode JSON-RPC request: {e}"),
        })?;
        line.push(b'\n');
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(PoolError::WorkerCrashed {
                message: "worker stdin closed".to_string(),
            });
        };
        stdin.write_all(&line).await.map_err(|e| PoolError::WorkerCrashed {
            message: format!("failed to write to worker stdin: {e}"),
        })
    }
}

/// Spawns a worker process, wires up its stdio, and blocks until the
/// ready sentinel appears on stderr (or `startup_timeout` elapses, in
/// which case the process is killed and `WorkerStartupFailed` returned).
///
/// `on_exit` is invoked from a background task when the child process
/// exits unexpectedly, so the pool can reassign in-flight requests and
/// consider spawning a replacement.
pub async fn spawn(
    id: u64,
    command: &str,
    args: &[String],
    ready_sentinel: &str,
    startup_timeout: Duration,
    on_exit: impl FnOnce() + Send + 'static,
) -> Result<std::sync::Arc<Worker>> {
    let mut child = tokio::process::Command::new(command)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PoolError::WorkerStartupFailed {
            message: format!("failed to spawn '{command}': {e}"),
        })?;

    let stdin = child.stdin.take().ok_or_else(|| PoolError::WorkerStartupFailed {
        message: "worker process has no stdin".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| PoolError::WorkerStartupFailed {
        message: "worker process has no stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| PoolError::WorkerStartupFailed {
        message: "worker process has no stderr".to_string(),
    })?;

    let sentinel = ready_sentinel.to_string();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let wait_for_ready = async {
        loop {
            match stderr_lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim() == sentinel || line.contains(sentinel.as_str()) {
                        return Ok(());
                    }
                    tracing::debug!(worker_id = id, line, "worker stderr");
                }
                Ok(None) => {
                    return Err(PoolError::WorkerStartupFailed {
                        message: "worker closed stderr before signaling ready".to_string(),
                    });
                }
                Err(e) => {
                    return Err(PoolError::WorkerStartupFailed {
                        message: format!("error reading worker stderr: {e}"),
                    });
                }
            }
        }
    };

    match tokio::time::timeout(startup_timeout, wait_for_ready).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(e);
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(PoolError::WorkerStartupFailed {
                message: format!("worker did not signal ready within {startup_timeout:?}"),
            });
        }
    }

    let worker = std::sync::Arc::new(Worker {
        id,
        state: Mutex::new(WorkerState::Ready),
        stdin: tokio::sync::Mutex::new(Some(stdin)),
        in_flight: AtomicUsize::new(0),
        failure_count: AtomicU32::new(0),
        ewma_latency_ms: Mutex::new(0.0),
        started_at: Instant::now(),
        last_heartbeat: Mutex::new(Instant::now()),
        pending: Mutex::new(HashMap::new()),
        dead: AtomicBool::new(false),
    });

    spawn_stdout_reader(worker.clone(), stdout);
    spawn_stderr_drain(id, stderr_lines);
    spawn_exit_watcher(id, child, worker.clone(), on_exit);

    Ok(worker)
}

fn spawn_stdout_reader(worker: std::sync::Arc<Worker>, stdout: tokio::process::ChildStdout) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(value) => {
                            worker.touch_heartbeat();
                            let id = value.get("id").and_then(Value::as_u64);
                            if let Some(id) = id {
                                let entry = worker.pending.lock().unwrap().remove(&id);
                                if let Some(entry) = entry {
                                    let _ = entry.reply_tx.send(value);
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(worker_id = worker.id, error = %e, "malformed worker reply");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(worker_id = worker.id, error = %e, "error reading worker stdout");
                    break;
                }
            }
        }
    });
}

fn spawn_stderr_drain(
    id: u64,
    mut lines: tokio::io::Lines<BufReader<tokio::process::ChildStderr>>,
) {
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(worker_id = id, line, "worker stderr");
        }
    });
}

fn spawn_exit_watcher(
    id: u64,
    mut child: Child,
    worker: std::sync::Arc<Worker>,
    on_exit: impl FnOnce() + Send + 'static,
) {
    tokio::spawn(async move {
        let status = child.wait().await;
        worker.mark_dead();
        match status {
            Ok(status) if status.success() => {
                tracing::info!(worker_id = id, "worker exited cleanly");
            }
            Ok(status) => {
                tracing::warn!(worker_id = id, ?status, "worker exited with failure");
            }
            Err(e) => {
                tracing::warn!(worker_id = id, error = %e, "error waiting on worker process");
            }
        }
        // Wake up anything still parked on this worker's pending replies.
        let pending: Vec<_> = worker.pending.lock().unwrap().drain().collect();
        for (_, entry) in pending {
            let _ = entry.reply_tx.send(Value::Null);
        }
        on_exit();
    });
}
