//! Deferred bulk deletion
//!
//! Requests go into a bounded queue. Workers expand each request into
//! per-record tasks, the batcher groups tasks and a tracked dispatch applies
//! each batch through the [`DeleteSink`].
//!
//! On shutdown the batcher keeps consuming tasks while the workers forward
//! every queued request, then flushes what is buffered. The whole drain is
//! bounded by `shutdown_timeout`.

use std::sync::Arc;

use async_channel::TrySendError;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::batcher::{BatchBuffer, FlushTrigger};
use super::lifecycle::{Lifecycle, PoolStatus};
use super::scaler::{run_scaler, WorkerSlot, WorkerSlots};
use crate::config::DeletePoolConfig;
use crate::error::PoolError;
use crate::model::{DeletionRequest, Task};
use crate::sink::{DeleteSink, SinkError};

/// Worker pool for deferred deletions
///
/// # Example
///
/// ```ignore
/// use shortener_pipeline::{DeletePool, DeletePoolConfig, DeletionRequest};
///
/// let pool = DeletePool::new(store, DeletePoolConfig::from_env())?;
/// pool.start(&shutdown).await?;
///
/// // From an HTTP handler, after answering 202 Accepted
/// pool.submit(DeletionRequest::new(user_id, ids));
///
/// // On shutdown, flushes buffered deletions through the store
/// pool.stop().await;
/// ```
pub struct DeletePool {
    inner: Arc<Inner>,
}

struct Inner {
    config: DeletePoolConfig,
    sink: Arc<dyn DeleteSink>,
    lifecycle: Lifecycle,
    slots: Arc<WorkerSlots>,
    requests_tx: async_channel::Sender<DeletionRequest>,
    requests_rx: async_channel::Receiver<DeletionRequest>,
    tasks_tx: mpsc::Sender<Task>,
    tasks_rx: Mutex<Option<mpsc::Receiver<Task>>>,
    buffer: BatchBuffer,
    flushes: TaskTracker,
}

impl DeletePool {
    /// Create a new deletion pool
    pub fn new(sink: Arc<dyn DeleteSink>, config: DeletePoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let (requests_tx, requests_rx) = async_channel::bounded(config.request_queue_capacity);
        let (tasks_tx, tasks_rx) = mpsc::channel(config.task_queue_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                lifecycle: Lifecycle::new(config.pool_name.clone(), config.shutdown_timeout),
                slots: WorkerSlots::new(config.max_workers),
                buffer: BatchBuffer::new(config.batch_size),
                requests_tx,
                requests_rx,
                tasks_tx,
                tasks_rx: Mutex::new(Some(tasks_rx)),
                flushes: TaskTracker::new(),
                sink,
                config,
            }),
        })
    }

    /// Start the scaler, the batcher and the first worker
    ///
    /// The pool's scope is a child of `shutdown`; cancelling it stops the
    /// loops, but [`DeletePool::stop`] must still be awaited to join them.
    /// Spawns onto the current Tokio runtime.
    #[instrument(skip_all, fields(pool = %self.inner.config.pool_name))]
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<(), PoolError> {
        let inner = &self.inner;
        inner.lifecycle.begin(shutdown, |token| {
            info!(
                max_workers = inner.config.max_workers,
                batch_size = inner.config.batch_size,
                flush_period_ms = inner.config.batch_flush_period.as_millis() as u64,
                "Starting delete pool"
            );

            if let Some(tasks_rx) = inner.tasks_rx.lock().take() {
                inner
                    .lifecycle
                    .spawn_loop(Arc::clone(inner).run_batcher(tasks_rx, token.clone()));
            }

            let scaler_inner = Arc::clone(inner);
            let scaler_token = token.clone();
            inner.lifecycle.spawn_loop(async move {
                let backlog_inner = Arc::clone(&scaler_inner);
                run_scaler(
                    scaler_inner.config.pool_name.clone(),
                    scaler_inner.config.scaler_check_period,
                    scaler_token.clone(),
                    move || backlog_inner.requests_rx.len(),
                    || scaler_inner.add_worker(&scaler_token),
                )
                .await;
            });

            inner.add_worker(token);
        })
    }

    /// Queue a deletion request without waiting
    ///
    /// If the request queue is full the request is dropped and logged; the
    /// caller is never blocked and never sees an error.
    pub fn submit(&self, request: DeletionRequest) {
        let pool = &self.inner.config.pool_name;
        if request.is_empty() {
            return;
        }

        match self.inner.requests_tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                warn!(
                    pool = %pool,
                    owner_id = %request.owner_id,
                    records = request.len(),
                    "Request queue full, dropping deletion request"
                );
            }
            Err(TrySendError::Closed(request)) => {
                warn!(
                    pool = %pool,
                    owner_id = %request.owner_id,
                    records = request.len(),
                    "Pool is stopped, dropping deletion request"
                );
            }
        }
    }

    /// Stop the pool and drain buffered work through the sink
    ///
    /// Idempotent; concurrent callers all return once the drain is done.
    /// Returns within about `shutdown_timeout`; work still buffered then is
    /// logged and dropped.
    #[instrument(skip_all, fields(pool = %self.inner.config.pool_name))]
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner
            .lifecycle
            .shutdown(|| async {
                inner.requests_tx.close();
                inner.flushes.close();
                inner.flushes.wait().await;
            })
            .await;
    }

    /// Get current status
    pub fn status(&self) -> PoolStatus {
        self.inner.lifecycle.status()
    }

    /// Number of running workers
    pub fn active_workers(&self) -> u32 {
        self.inner.slots.active()
    }

    /// Number of requests waiting to be expanded
    pub fn backlog(&self) -> usize {
        self.inner.requests_rx.len()
    }

    /// Number of tasks sitting in the batch buffer
    pub fn buffered(&self) -> usize {
        self.inner.buffer.len()
    }
}

impl Inner {
    fn pool(&self) -> &str {
        self.lifecycle.pool()
    }

    /// Launch one more worker if a slot is free
    fn add_worker(self: &Arc<Self>, token: &CancellationToken) -> Option<u32> {
        if self.lifecycle.is_stopped() || token.is_cancelled() {
            return None;
        }

        let slot = self.slots.try_acquire()?;
        let worker_id = slot.id();
        self.lifecycle
            .spawn_worker(Arc::clone(self).run_worker(slot, token.clone()));

        debug!(
            pool = %self.pool(),
            worker_id,
            active = self.slots.active(),
            max = self.slots.max(),
            "Worker added"
        );
        Some(worker_id)
    }

    /// Expand requests until cancelled, then forward whatever is still queued
    async fn run_worker(self: Arc<Self>, slot: WorkerSlot, token: CancellationToken) {
        let worker_id = slot.id();
        debug!(pool = %self.pool(), worker_id, "Delete worker started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = self.requests_rx.recv() => match received {
                    Ok(request) => self.expand(worker_id, request),
                    Err(_) => break,
                },
            }
        }

        while !self.lifecycle.drain_overdue(&token) {
            let Ok(request) = self.requests_rx.try_recv() else {
                break;
            };
            self.forward(worker_id, request).await;
        }

        debug!(pool = %self.pool(), worker_id, "Delete worker stopped");
        drop(slot);
    }

    /// Split a request into tasks and queue them for the batcher
    fn expand(&self, worker_id: u32, request: DeletionRequest) {
        for task in request.into_tasks() {
            match self.tasks_tx.try_send(task) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(task)) => {
                    error!(
                        pool = %self.pool(),
                        worker_id,
                        record_id = %task.record_id,
                        "Task queue full, dropping task"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(task)) => {
                    warn!(
                        pool = %self.pool(),
                        worker_id,
                        record_id = %task.record_id,
                        "Batcher is gone, dropping task"
                    );
                }
            }
        }
    }

    /// Queue every task of a request during the drain, waiting for room
    /// until the drain deadline
    async fn forward(&self, worker_id: u32, request: DeletionRequest) {
        let owner_id = request.owner_id.clone();
        let deadline = self.lifecycle.drain_deadline();
        let mut dropped = 0usize;

        for task in request.into_tasks() {
            match timeout_at(deadline, self.tasks_tx.send(task)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => dropped += 1,
            }
        }

        if dropped > 0 {
            error!(
                pool = %self.pool(),
                worker_id,
                owner_id = %owner_id,
                dropped,
                "Shutdown deadline reached, dropping tasks"
            );
        }
    }

    /// Accumulate tasks and flush on size or on every tick
    async fn run_batcher(self: Arc<Self>, mut tasks: mpsc::Receiver<Task>, token: CancellationToken) {
        let period = self.config.batch_flush_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(task) = tasks.recv() => {
                    if let Some(batch) = self.buffer.push(task) {
                        self.dispatch(batch, FlushTrigger::Size, &token);
                    }
                }
                _ = ticker.tick() => {
                    if let Some(batch) = self.buffer.take() {
                        self.dispatch(batch, FlushTrigger::Tick, &token);
                    }
                }
            }
        }

        // Workers block on a full task queue while draining, so keep reading
        {
            let workers_done = self.lifecycle.wait_workers();
            tokio::pin!(workers_done);

            loop {
                tokio::select! {
                    biased;
                    Some(task) = tasks.recv() => self.collect(task, &token).await,
                    _ = &mut workers_done => break,
                }
            }
        }

        // A submit can land after the last worker's drain
        self.requests_tx.close();
        while let Ok(request) = self.requests_rx.try_recv() {
            for task in request.into_tasks() {
                self.collect(task, &token).await;
            }
        }

        while let Ok(task) = tasks.try_recv() {
            self.collect(task, &token).await;
        }

        if let Some(batch) = self.buffer.take() {
            info!(
                pool = %self.pool(),
                batch_size = batch.len(),
                "Flushing buffer on shutdown"
            );
            self.execute(batch, FlushTrigger::Shutdown, &token).await;
        }

        debug!(pool = %self.pool(), "Batcher loop exited");
    }

    /// Buffer a task during the drain, applying a full batch in place
    async fn collect(&self, task: Task, token: &CancellationToken) {
        if let Some(batch) = self.buffer.push(task) {
            self.execute(batch, FlushTrigger::Shutdown, token).await;
        }
    }

    /// Apply a batch on a tracked task without waiting for it
    fn dispatch(
        self: &Arc<Self>,
        batch: Vec<Task>,
        trigger: FlushTrigger,
        token: &CancellationToken,
    ) {
        let inner = Arc::clone(self);
        let token = token.clone();
        self.flushes.spawn(async move {
            inner.execute(batch, trigger, &token).await;
        });
    }

    /// Apply a batch, bounded by `sink_timeout` and by the drain deadline;
    /// failures are logged and dropped
    async fn execute(&self, batch: Vec<Task>, trigger: FlushTrigger, token: &CancellationToken) {
        let batch_size = batch.len();

        if self.lifecycle.drain_overdue(token) {
            error!(
                pool = %self.pool(),
                batch_size,
                trigger = %trigger,
                "Shutdown deadline reached, dropping batch"
            );
            return;
        }

        let started = Instant::now();
        let timeout = self.config.sink_timeout;
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.sink.apply(batch)) => {
                result.unwrap_or(Err(SinkError::Timeout(timeout)))
            }
            _ = self.lifecycle.drain_expired(token) => Err(SinkError::Timeout(started.elapsed())),
        };

        match result {
            Ok(()) => {
                debug!(
                    pool = %self.pool(),
                    batch_size,
                    trigger = %trigger,
                    "Batch processed successfully"
                );
            }
            Err(e) => {
                error!(
                    pool = %self.pool(),
                    batch_size,
                    trigger = %trigger,
                    error = %e,
                    "Batch processing failed"
                );
            }
        }
    }
}
