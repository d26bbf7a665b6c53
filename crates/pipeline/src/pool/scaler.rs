//! Worker provisioning
//!
//! Workers are counted in [`WorkerSlots`]. The scaler loop adds at most one
//! worker per tick while there is a backlog and a free slot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Capped counter of running workers
pub(crate) struct WorkerSlots {
    max: u32,
    active: AtomicU32,
    next_id: AtomicU32,
}

impl WorkerSlots {
    pub(crate) fn new(max: u32) -> Arc<Self> {
        Arc::new(Self {
            max: max.max(1),
            active: AtomicU32::new(0),
            next_id: AtomicU32::new(0),
        })
    }

    /// Claim a slot for a new worker
    ///
    /// The active count is incremented before the worker is launched, so two
    /// callers racing for the last slot cannot both win it.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max).then_some(active + 1)
            })
            .ok()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Some(WorkerSlot {
            id,
            slots: Arc::clone(self),
        })
    }

    pub(crate) fn active(&self) -> u32 {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn max(&self) -> u32 {
        self.max
    }
}

/// A claimed worker slot, released when dropped
pub(crate) struct WorkerSlot {
    id: u32,
    slots: Arc<WorkerSlots>,
}

impl WorkerSlot {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.slots.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run the scaler until `token` is cancelled
///
/// `backlog` reports the current queue depth; `provision` tries to add one
/// worker and returns its id.
pub(crate) async fn run_scaler<B, P>(
    pool: String,
    period: Duration,
    token: CancellationToken,
    backlog: B,
    provision: P,
) where
    B: Fn() -> usize,
    P: Fn() -> Option<u32>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(pool = %pool, "Scaler loop: shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let queued = backlog();
                if queued == 0 {
                    continue;
                }
                match provision() {
                    Some(worker_id) => {
                        debug!(pool = %pool, worker_id, backlog = queued, "Scaled up worker pool");
                    }
                    None => {
                        trace!(pool = %pool, backlog = queued, "Backlog present but pool is at capacity");
                    }
                }
            }
        }
    }

    debug!(pool = %pool, "Scaler loop exited");
}
