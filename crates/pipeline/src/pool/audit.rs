//! Best-effort audit event delivery

use std::sync::Arc;

use async_channel::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::lifecycle::{Lifecycle, PoolStatus};
use super::scaler::{run_scaler, WorkerSlot, WorkerSlots};
use crate::config::AuditPoolConfig;
use crate::error::PoolError;
use crate::model::AuditEvent;
use crate::sink::{AuditSink, SinkError};

/// Worker pool delivering audit events to an [`AuditSink`]
///
/// Events are not batched: each worker takes one event off the queue and
/// sends it. The sink is closed once, after every worker has exited.
///
/// Once the pool's scope is cancelled, workers keep delivering queued events
/// until `shutdown_timeout` has passed; anything left after that is dropped.
pub struct AuditPool {
    inner: Arc<Inner>,
}

struct Inner {
    config: AuditPoolConfig,
    sink: Arc<dyn AuditSink>,
    lifecycle: Lifecycle,
    slots: Arc<WorkerSlots>,
    events_tx: async_channel::Sender<AuditEvent>,
    events_rx: async_channel::Receiver<AuditEvent>,
}

impl AuditPool {
    /// Create a new audit pool
    pub fn new(sink: Arc<dyn AuditSink>, config: AuditPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let (events_tx, events_rx) = async_channel::bounded(config.event_queue_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                lifecycle: Lifecycle::new(config.pool_name.clone(), config.shutdown_timeout),
                slots: WorkerSlots::new(config.max_workers),
                events_tx,
                events_rx,
                sink,
                config,
            }),
        })
    }

    /// Start the scaler and the first worker
    ///
    /// Spawns onto the current Tokio runtime.
    #[instrument(skip_all, fields(pool = %self.inner.config.pool_name))]
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<(), PoolError> {
        let inner = &self.inner;
        inner.lifecycle.begin(shutdown, |token| {
            info!(
                max_workers = inner.config.max_workers,
                queue_capacity = inner.config.event_queue_capacity,
                "Starting audit pool"
            );

            let scaler_inner = Arc::clone(inner);
            let scaler_token = token.clone();
            inner.lifecycle.spawn_loop(async move {
                let backlog_inner = Arc::clone(&scaler_inner);
                run_scaler(
                    scaler_inner.config.pool_name.clone(),
                    scaler_inner.config.scaler_check_period,
                    scaler_token.clone(),
                    move || backlog_inner.events_rx.len(),
                    || scaler_inner.add_worker(&scaler_token),
                )
                .await;
            });

            inner.add_worker(token);
        })
    }

    /// Queue an audit event without waiting
    ///
    /// Dropped (and logged) when the queue is full or the pool is stopping.
    pub fn submit(&self, event: AuditEvent) {
        let pool = &self.inner.config.pool_name;
        if self.inner.lifecycle.is_stopped() {
            debug!(pool = %pool, action = %event.action, "Pool is stopped, dropping audit event");
            return;
        }

        match self.inner.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                error!(
                    pool = %pool,
                    action = %event.action,
                    owner_id = %event.owner_id,
                    "Event queue full, dropping audit event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                warn!(pool = %pool, action = %event.action, "Event queue closed, dropping audit event");
            }
        }
    }

    /// Stop the pool, deliver queued events and close the sink
    ///
    /// Idempotent; the sink is closed exactly once. Delivery stops at
    /// `shutdown_timeout`, and events still queued then are dropped.
    #[instrument(skip_all, fields(pool = %self.inner.config.pool_name))]
    pub async fn stop(&self) {
        let inner = &self.inner;
        inner
            .lifecycle
            .shutdown(|| async {
                inner.events_tx.close();

                let dropped = inner.events_rx.len();
                if dropped > 0 {
                    warn!(
                        pool = %inner.pool(),
                        dropped,
                        "Dropping audit events left in the queue at shutdown"
                    );
                }

                if let Err(e) = inner.sink.close().await {
                    error!(pool = %inner.pool(), error = %e, "Failed to close audit sink");
                }
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

    /// Number of events waiting for a worker
    pub fn backlog(&self) -> usize {
        self.inner.events_rx.len()
    }
}

impl Inner {
    fn pool(&self) -> &str {
        self.lifecycle.pool()
    }

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

    /// Send events until cancelled, then keep sending queued events until the
    /// drain deadline
    async fn run_worker(self: Arc<Self>, slot: WorkerSlot, token: CancellationToken) {
        let worker_id = slot.id();
        debug!(pool = %self.pool(), worker_id, "Audit worker started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = self.events_rx.recv() => match received {
                    Ok(event) => self.process(worker_id, event, &token).await,
                    Err(_) => break,
                },
            }
        }

        while !self.lifecycle.drain_overdue(&token) {
            let Ok(event) = self.events_rx.try_recv() else {
                break;
            };
            self.process(worker_id, event, &token).await;
        }

        debug!(pool = %self.pool(), worker_id, "Audit worker stopped");
        drop(slot);
    }

    /// Send one event, bounded by `sink_timeout` and by the drain deadline
    async fn process(&self, worker_id: u32, event: AuditEvent, token: &CancellationToken) {
        let started = Instant::now();
        let timeout = self.config.sink_timeout;

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.sink.send(&event)) => {
                result.unwrap_or(Err(SinkError::Timeout(timeout)))
            }
            _ = self.lifecycle.drain_expired(token) => Err(SinkError::Timeout(started.elapsed())),
        };

        if let Err(e) = result {
            error!(
                pool = %self.pool(),
                worker_id,
                action = %event.action,
                error = %e,
                "Error adding audit record"
            );
        }
    }
}
