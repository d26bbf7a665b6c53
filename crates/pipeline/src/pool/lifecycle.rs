//! Pool lifecycle: start once, stop once, wait for everything launched

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::error::PoolError;

/// Pool lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, `start` not called yet
    Created,
    /// Loops running, accepting work
    Running,
    /// `stop` in progress, draining buffered work
    Stopping,
    /// Every loop and worker has exited
    Stopped,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Shared lifecycle state of one pool
///
/// `loops` tracks the scaler and batcher, `workers` tracks the workers. Both
/// are joined by [`Lifecycle::shutdown`].
///
/// Draining after cancellation is bounded by one deadline, `shutdown_timeout`
/// after the first component asks for it.
pub(crate) struct Lifecycle {
    pool: String,
    shutdown_timeout: Duration,
    drain_deadline: Mutex<Option<Instant>>,
    status: RwLock<PoolStatus>,
    stopped: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    stop_once: OnceCell<()>,
    loops: TaskTracker,
    workers: TaskTracker,
}

impl Lifecycle {
    pub(crate) fn new(pool: impl Into<String>, shutdown_timeout: Duration) -> Self {
        Self {
            pool: pool.into(),
            shutdown_timeout,
            drain_deadline: Mutex::new(None),
            status: RwLock::new(PoolStatus::Created),
            stopped: AtomicBool::new(false),
            cancel: Mutex::new(None),
            stop_once: OnceCell::new(),
            loops: TaskTracker::new(),
            workers: TaskTracker::new(),
        }
    }

    pub(crate) fn pool(&self) -> &str {
        &self.pool
    }

    pub(crate) fn status(&self) -> PoolStatus {
        *self.status.read()
    }

    /// Set once `stop` has been called
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Deadline for draining buffered work, fixed by the first caller
    pub(crate) fn drain_deadline(&self) -> Instant {
        *self
            .drain_deadline
            .lock()
            .get_or_insert_with(|| Instant::now() + self.shutdown_timeout)
    }

    /// Whether `token` is cancelled and the drain deadline has passed
    pub(crate) fn drain_overdue(&self, token: &CancellationToken) -> bool {
        token.is_cancelled() && Instant::now() >= self.drain_deadline()
    }

    /// Resolves once `token` is cancelled and the drain deadline has passed
    ///
    /// Raced against sink calls so an in-flight call cannot outlive the drain.
    pub(crate) async fn drain_expired(&self, token: &CancellationToken) {
        token.cancelled().await;
        tokio::time::sleep_until(self.drain_deadline()).await;
    }

    /// Move `Created -> Running` and run `launch` with the pool's scope
    ///
    /// The scope is a child of `parent`. `launch` runs under the status lock,
    /// so a concurrent `shutdown` sees either nothing launched or everything.
    pub(crate) fn begin<F>(&self, parent: &CancellationToken, launch: F) -> Result<(), PoolError>
    where
        F: FnOnce(&CancellationToken),
    {
        let mut status = self.status.write();
        match *status {
            PoolStatus::Created => {}
            PoolStatus::Running => return Err(PoolError::AlreadyStarted(self.pool.clone())),
            PoolStatus::Stopping | PoolStatus::Stopped => {
                return Err(PoolError::Stopped(self.pool.clone()))
            }
        }

        let token = parent.child_token();
        *self.cancel.lock() = Some(token.clone());
        launch(&token);
        *status = PoolStatus::Running;

        info!(pool = %self.pool, "Pool started");
        Ok(())
    }

    /// Track a long-running loop (scaler, batcher)
    pub(crate) fn spawn_loop<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.loops.spawn(task);
    }

    /// Track a worker
    pub(crate) fn spawn_worker<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.spawn(task);
    }

    /// Wait for every worker to exit
    ///
    /// Closes the worker tracker first; a worker spawned after that is still
    /// waited for.
    pub(crate) async fn wait_workers(&self) {
        self.workers.close();
        self.workers.wait().await;
    }

    /// Stop the pool exactly once
    ///
    /// Cancels the scope, waits for loops and workers, then runs `finish`.
    /// Concurrent and repeated callers all return once the first teardown has
    /// completed.
    pub(crate) async fn shutdown<F, Fut>(&self, finish: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.stop_once
            .get_or_init(|| async {
                self.stopped.store(true, Ordering::Release);
                {
                    let mut status = self.status.write();
                    *status = PoolStatus::Stopping;
                    if let Some(token) = self.cancel.lock().as_ref() {
                        token.cancel();
                    }
                }

                let remaining = self.drain_deadline().saturating_duration_since(Instant::now());
                info!(
                    pool = %self.pool,
                    timeout_ms = remaining.as_millis() as u64,
                    "Initiating graceful shutdown"
                );

                self.loops.close();
                self.loops.wait().await;
                self.wait_workers().await;

                finish().await;

                *self.status.write() = PoolStatus::Stopped;
                info!(pool = %self.pool, "Pool stopped");
            })
            .await;
    }
}
