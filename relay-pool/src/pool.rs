//! Pool / Multiplexer: admits MCP requests onto a FIFO
//! queue, load-balances dispatch across workers by least-connections, and
//! auto-scales the pool against utilization thresholds.
//!
//! The worker table is a single shared structure under a pool-global
//! lock held only for dispatch *decisions*, not for request I/O: picking
//! a worker and writing its stdin happens while holding the lock just
//! long enough to choose and hand off; awaiting the reply runs in an
//! independently spawned task.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex, Notify, RwLock};

use crate::error::{PoolError, Result};
use crate::metrics::PoolMetricsCollector;
use crate::worker::{self, PendingReply, Worker, WorkerState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_jsonrpc_version() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub worker_command: String,
    pub worker_args: Vec<String>,
    pub ready_sentinel: String,
    pub startup_timeout: Duration,
    pub min_instances: usize,
    pub max_instances: usize,
    pub max_concurrent_per_worker: usize,
    pub request_timeout: Duration,
    pub queue_limit: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub scale_cooldown: Duration,
    pub scale_tick_interval: Duration,
    pub worker_failure_threshold: u32,
    pub orphan_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_command: "mcp-rag-worker".to_string(),
            worker_args: Vec::new(),
            ready_sentinel: "MCP_RAG_READY".to_string(),
            startup_timeout: Duration::from_secs(15),
            min_instances: 2,
            max_instances: 6,
            max_concurrent_per_worker: 3,
            request_timeout: Duration::from_secs(90),
            queue_limit: 30,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_cooldown: Duration::from_secs(30),
            scale_tick_interval: Duration::from_secs(10),
            worker_failure_threshold: 3,
            orphan_grace: Duration::from_secs(5),
        }
    }
}

struct QueueEntry {
    /// Correlation id for this admission, independent of the caller's
    /// JSON-RPC id and the pool-rewritten id used on the wire; carried only
    /// for tracing/log correlation across queue -> dispatch -> reply.
    correlation_id: uuid::Uuid,
    request: JsonRpcRequest,
    deadline: Instant,
    enqueued_at: Instant,
    retries: u8,
    reply_tx: oneshot::Sender<Result<JsonRpcResponse>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub ready: usize,
    pub busy: usize,
    pub starting: usize,
    pub draining: usize,
    pub queued: usize,
}

/// Maintains the worker set and the FIFO admission queue, and runs the
/// dispatcher and auto-scaling controller as background tasks for the
/// lifetime of the pool.
pub struct Pool {
    config: RwLock<PoolConfig>,
    workers: RwLock<HashMap<u64, Arc<Worker>>>,
    queue: AsyncMutex<VecDeque<QueueEntry>>,
    queue_notify: Notify,
    capacity_notify: Notify,
    next_worker_id: AtomicU64,
    next_request_id: AtomicU64,
    last_scale: AsyncMutex<Instant>,
    metrics: Arc<PoolMetricsCollector>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Pool {
    /// Constructs the pool and spawns `min_instances` workers. Call
    /// [`Pool::run`] once, from the caller's startup path, to start the
    /// dispatcher and auto-scaler background tasks.
    pub async fn new(config: PoolConfig) -> Result<Arc<Self>> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = Arc::new(Self {
            config: RwLock::new(config.clone()),
            workers: RwLock::new(HashMap::new()),
            queue: AsyncMutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            capacity_notify: Notify::new(),
            next_worker_id: AtomicU64::new(0),
            next_request_id: AtomicU64::new(0),
            last_scale: AsyncMutex::new(Instant::now() - config.scale_cooldown),
            metrics: Arc::new(PoolMetricsCollector::new()),
            shutdown_tx,
            shutdown_rx,
        });

        for _ in 0..config.min_instances {
            pool.spawn_worker().await?;
        }

        Ok(pool)
    }

    pub fn metrics(&self) -> &Arc<PoolMetricsCollector> {
        &self.metrics
    }

    /// Starts the dispatcher and auto-scaling controller. Idempotent per
    /// call site: invoke once from the process's startup path.
    pub fn run(self: &Arc<Self>) {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch_loop().await });

        let scaler = self.clone();
        tokio::spawn(async move { scaler.scale_loop().await });
    }

    async fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let config = self.config.read().await.clone();
        let pool = self.clone();
        let started = Instant::now();
        let worker = worker::spawn(
            id,
            &config.worker_command,
            &config.worker_args,
            &config.ready_sentinel,
            config.startup_timeout,
            move || {
                let pool = pool.clone();
                tokio::spawn(async move {
                    pool.on_worker_exit(id).await;
                });
            },
        )
        .await?;
        self.metrics.record_worker_startup(started.elapsed().as_millis() as u64);
        self.workers.write().await.insert(id, worker);
        tracing::info!(worker_id = id, "worker ready");
        Ok(())
    }

    async fn on_worker_exit(self: &Arc<Self>, id: u64) {
        tracing::warn!(worker_id = id, "worker exited; reassigning in-flight requests");
        self.metrics.record_worker_crash();
        self.workers.write().await.remove(&id);
        self.capacity_notify.notify_waiters();

        // Ensure the floor is maintained; the scale loop would eventually
        // do this too, but a crash shouldn't wait for the next tick.
        if self.workers.read().await.len() < self.config.read().await.min_instances {
            let _ = self.spawn_worker().await;
        }
    }

    /// Admits a request onto the FIFO queue and awaits its outcome. This
    /// is the pool's only public entry point for forwarding an MCP call
    /// (rewrites ids, forwards, and returns
    /// replies unchanged except for id").
    pub async fn dispatch(&self, request: JsonRpcRequest, deadline: Instant) -> Result<JsonRpcResponse> {
        let queue_limit = self.config.read().await.queue_limit;
        let correlation_id = uuid::Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= queue_limit {
                self.metrics.record_overload_rejection();
                tracing::warn!(%correlation_id, queue_len = queue.len(), "queue saturated, rejecting");
                return Err(PoolError::Overloaded);
            }
            tracing::debug!(%correlation_id, method = %request.method, "request admitted");
            queue.push_back(QueueEntry {
                correlation_id,
                request,
                deadline,
                enqueued_at: Instant::now(),
                retries: 0,
                reply_tx,
            });
        }
        self.queue_notify.notify_one();

        match tokio::time::timeout_at(deadline.into(), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PoolError::Internal {
                message: "dispatcher dropped the reply channel".to_string(),
            }),
            Err(_) => Err(PoolError::DeadlineExceeded),
        }
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let workers = self.workers.read().await;
        let mut snapshot = PoolSnapshot {
            ready: 0,
            busy: 0,
            starting: 0,
            draining: 0,
            queued: self.queue.lock().await.len(),
        };
        for worker in workers.values() {
            match worker.state() {
                WorkerState::Ready if worker.in_flight() > 0 => snapshot.busy += 1,
                WorkerState::Ready => snapshot.ready += 1,
                WorkerState::Busy => snapshot.busy += 1,
                WorkerState::Starting => snapshot.starting += 1,
                WorkerState::Draining => snapshot.draining += 1,
                WorkerState::Dead => {}
            }
        }
        snapshot
    }

    /// Dispatcher loop: the pool's single serializing point for dispatch
    /// decisions. Picks a worker with capacity by
    /// least-connections, ties broken by lowest EWMA latency then
    /// round-robin (insertion order of the candidate list).
    async fn dispatch_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = self.queue_notify.notified() => {}
                _ = self.capacity_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            loop {
                let front_expired = {
                    let mut queue = self.queue.lock().await;
                    match queue.front() {
                        Some(front) if Instant::now() >= front.deadline => {
                            Some(queue.pop_front().unwrap())
                        }
                        Some(_) => None,
                        None => break,
                    }
                };
                if let Some(expired) = front_expired {
                    let _ = expired.reply_tx.send(Err(PoolError::DeadlineExceeded));
                    continue;
                }

                let cap = self.config.read().await.max_concurrent_per_worker;
                let Some(worker) = self.pick_worker(cap).await else {
                    break;
                };

                let entry = {
                    let mut queue = self.queue.lock().await;
                    match queue.front() {
                        Some(front) if Instant::now() >= front.deadline => None,
                        _ => queue.pop_front(),
                    }
                };
                match entry {
                    Some(entry) => self.hand_off(entry, worker),
                    None => continue,
                }
            }
        }
    }

    /// Least-connections pick among non-Draining, non-Dead workers below
    /// their per-worker cap.
    async fn pick_worker(&self, cap: usize) -> Option<Arc<Worker>> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| !w.is_dead() && w.state() != WorkerState::Draining && w.in_flight() < cap)
            .min_by(|a, b| {
                a.in_flight()
                    .cmp(&b.in_flight())
                    .then_with(|| {
                        a.ewma_latency_ms()
                            .partial_cmp(&b.ewma_latency_ms())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }

    /// Assigns one queued request to `worker`: rewrites its id, writes the
    /// rewritten request to stdin, and spawns an independent task that
    /// awaits the worker's reply (or the request's deadline) so the
    /// dispatch loop itself never blocks on request I/O.
    fn hand_off(self: &Arc<Self>, entry: QueueEntry, worker: Arc<Worker>) {
        let pool_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let external_id = entry.request.id.clone();
        let correlation_id = entry.correlation_id;
        let queue_wait_ms = entry.enqueued_at.elapsed().as_millis() as u64;
        self.metrics.record_queue_wait(queue_wait_ms);
        tracing::debug!(%correlation_id, worker_id = worker.id, pool_id, queue_wait_ms, "dispatching");

        let original_request = entry.request.clone();
        let mut rewritten = entry.request;
        rewritten.id = Value::from(pool_id);

        worker.begin_request();
        worker.set_state(WorkerState::Busy);

        let (worker_reply_tx, worker_reply_rx) = oneshot::channel::<Value>();
        worker
            .pending
            .lock()
            .unwrap()
            .insert(pool_id, PendingReply { external_id: external_id.clone(), reply_tx: worker_reply_tx });

        let pool = self.clone();
        let deadline = entry.deadline;
        let reply_tx = entry.reply_tx;
        let mut retries = entry.retries;
        tokio::spawn(async move {
            let started = Instant::now();
            let write_result = worker.write_request(&serde_json::to_value(&rewritten).unwrap()).await;
            if let Err(e) = write_result {
                worker.end_request(started);
                worker.record_failure();
                pool.capacity_notify.notify_waiters();
                Self::check_worker_health(&pool, &worker).await;
                Self::maybe_reassign(&pool, correlation_id, reply_tx, original_request, deadline, &mut retries, e).await;
                return;
            }

            let mut worker_reply_rx = worker_reply_rx;
            tokio::select! {
                biased;
                reply = &mut worker_reply_rx => {
                    worker.end_request(started);
                    worker.set_state(WorkerState::Ready);
                    pool.capacity_notify.notify_waiters();
                    match reply {
                        Ok(Value::Null) => {
                            // worker died before replying
                            worker.record_failure();
                            Self::check_worker_health(&pool, &worker).await;
                            Self::maybe_reassign(
                                &pool, correlation_id, reply_tx, original_request, deadline, &mut retries,
                                PoolError::WorkerCrashed { message: "worker exited mid-request".to_string() },
                            ).await;
                        }
                        Ok(mut value) => {
                            if let Some(obj) = value.as_object_mut() {
                                obj.insert("id".to_string(), external_id);
                            }
                            let response: std::result::Result<JsonRpcResponse, _> = serde_json::from_value(value);
                            match response {
                                Ok(response) => { let _ = reply_tx.send(Ok(response)); }
                                Err(e) => { let _ = reply_tx.send(Err(PoolError::Internal { message: e.to_string() })); }
                            }
                        }
                        Err(_) => {
                            let _ = reply_tx.send(Err(PoolError::Internal {
                                message: "worker reply channel closed".to_string(),
                            }));
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.into()) => {
                    let _ = reply_tx.send(Err(PoolError::DeadlineExceeded));
                    // Grace window: the in-flight count is only released
                    // once the reply actually arrives or this grace
                    // window elapses, whichever first, so a
                    // late reply can't be attributed to a future request.
                    let grace = pool.config.read().await.orphan_grace;
                    tokio::select! {
                        _ = &mut worker_reply_rx => {
                            worker.end_request(started);
                        }
                        _ = tokio::time::sleep(grace) => {
                            worker.pending.lock().unwrap().remove(&pool_id);
                            worker.end_request(started);
                        }
                    }
                    worker.set_state(WorkerState::Ready);
                    pool.capacity_notify.notify_waiters();
                }
            }
        });
    }

    /// Worker crash semantics: reassign once under the same
    /// deadline, then fail as `WorkerCrashed`.
    async fn maybe_reassign(
        pool: &Arc<Self>,
        correlation_id: uuid::Uuid,
        reply_tx: oneshot::Sender<Result<JsonRpcResponse>>,
        original_request: JsonRpcRequest,
        deadline: Instant,
        retries: &mut u8,
        err: PoolError,
    ) {
        if *retries == 0 && Instant::now() < deadline {
            *retries += 1;
            tracing::warn!(%correlation_id, error = %err, "reassigning after worker failure");
            let mut queue = pool.queue.lock().await;
            queue.push_front(QueueEntry {
                correlation_id,
                request: original_request,
                deadline,
                enqueued_at: Instant::now(),
                retries: *retries,
                reply_tx,
            });
            drop(queue);
            pool.queue_notify.notify_one();
        } else {
            let _ = reply_tx.send(Err(err));
        }
    }

    /// Worker-level circuit breaking: after
    /// `worker_failure_threshold` consecutive dispatch failures, drain and
    /// replace the worker rather than keep routing to it.
    async fn check_worker_health(pool: &Arc<Self>, worker: &Arc<Worker>) {
        let threshold = pool.config.read().await.worker_failure_threshold;
        if worker.failure_count() >= threshold && worker.state() != WorkerState::Draining && !worker.is_dead() {
            tracing::warn!(worker_id = worker.id, failures = worker.failure_count(), "worker exceeded failure threshold; draining");
            let pool = pool.clone();
            let worker = worker.clone();
            tokio::spawn(async move {
                pool.drain_and_remove(worker).await;
                if pool.workers.read().await.len() < pool.config.read().await.min_instances {
                    let _ = pool.spawn_worker().await;
                }
            });
        }
    }

    /// Auto-scaling controller: on each tick, computes
    /// utilization across Ready/Busy workers and scales up or down
    /// against the configured thresholds, subject to a global cooldown.
    async fn scale_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let tick = self.config.read().await.scale_tick_interval;
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
            self.maybe_scale().await;
        }
    }

    async fn maybe_scale(self: &Arc<Self>) {
        let config = self.config.read().await.clone();
        let mut last_scale = self.last_scale.lock().await;
        if last_scale.elapsed() < config.scale_cooldown {
            return;
        }

        let workers = self.workers.read().await;
        let live: Vec<_> = workers
            .values()
            .filter(|w| !w.is_dead() && w.state() != WorkerState::Draining)
            .cloned()
            .collect();
        let live_count = live.len().max(1);
        let in_flight: usize = live.iter().map(|w| w.in_flight()).sum();
        let capacity = live_count * config.max_concurrent_per_worker;
        let utilization = in_flight as f64 / capacity as f64;
        drop(workers);

        if utilization >= config.scale_up_threshold && live.len() < config.max_instances {
            tracing::info!(utilization, "pool scaling up");
            *last_scale = Instant::now();
            drop(last_scale);
            self.metrics.record_scale_event();
            let _ = self.spawn_worker().await;
        } else if utilization <= config.scale_down_threshold && live.len() > config.min_instances {
            if let Some(victim) = live.iter().min_by_key(|w| w.in_flight()).cloned() {
                tracing::info!(utilization, worker_id = victim.id, "pool scaling down");
                *last_scale = Instant::now();
                drop(last_scale);
                self.metrics.record_scale_event();
                self.drain_and_remove(victim).await;
            }
        }
    }

    async fn drain_and_remove(&self, worker: Arc<Worker>) {
        worker.set_state(WorkerState::Draining);
        let deadline = Instant::now() + Duration::from_secs(30);
        while worker.in_flight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.workers.write().await.remove(&worker.id);
        worker.mark_dead();
    }

    /// Two-phase shutdown: stop admission,
    /// await in-flight completion up to `grace`, then the dropped workers
    /// (via `kill_on_drop`) are force-killed.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let deadline = Instant::now() + grace;
        loop {
            let total_in_flight: usize = self.workers.read().await.values().map(|w| w.in_flight()).sum();
            if total_in_flight == 0 || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PoolConfig {
        PoolConfig {
            min_instances: 0,
            max_instances: 2,
            queue_limit: 2,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn queue_saturation_rejects_without_worker_involvement() {
        let pool = Pool::new(cfg()).await.unwrap();
        // No workers registered; fill the queue directly to exercise the
        // admission check in isolation from worker startup.
        for _ in 0..2 {
            pool.queue.lock().await.push_back(QueueEntry {
                correlation_id: uuid::Uuid::new_v4(),
                request: JsonRpcRequest {
                    jsonrpc: "2.0".to_string(),
                    id: Value::from(1),
                    method: "noop".to_string(),
                    params: Value::Null,
                },
                deadline: Instant::now() + Duration::from_secs(5),
                enqueued_at: Instant::now(),
                retries: 0,
                reply_tx: oneshot::channel().0,
            });
        }

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Value::from(2),
            method: "noop".to_string(),
            params: Value::Null,
        };
        let err = pool
            .dispatch(request, Instant::now() + Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Overloaded);
    }

    #[tokio::test]
    async fn snapshot_reports_queue_depth() {
        let pool = Pool::new(cfg()).await.unwrap();
        let snap = pool.snapshot().await;
        assert_eq!(snap.queued, 0);
        assert_eq!(snap.ready + snap.busy + snap.starting, 0);
    }
}
