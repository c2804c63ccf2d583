//! Admission control for resolution requests.
//!
//! At most `max_concurrent` resolutions run at once. Requests beyond the
//! ceiling wait in a bounded priority queue; once the queue holds
//! `max_pending` requests, new arrivals are refused with
//! [`ResolveError::Overloaded`] instead of queueing without bound.
//!
//! # Hand-off
//!
//! Dropping an [`AdmissionPermit`] frees its slot. Under a single lock the
//! controller either passes the slot directly to the next queued request
//! (priority first, then arrival order) or decrements the active count.
//! The active count is never observed in between, so a released slot cannot
//! be claimed twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::ResolveError;
use crate::queue::{Priority, PriorityQueue};
use crate::stats::AdmissionStatsSnapshot;

type Grant = oneshot::Sender<Result<(), ResolveError>>;

struct AdmissionState {
    active: usize,
    max_concurrent: usize,
    max_pending: usize,
    closed: bool,
    queue: PriorityQueue<Grant>,
}

/// Concurrency ceiling with a bounded wait queue.
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    rejected: AtomicU64,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AdmissionController")
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .field("max_concurrent", &state.max_concurrent)
            .field("max_pending", &state.max_pending)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Create a controller. `max_concurrent` is raised to at least 1.
    pub fn new(max_concurrent: usize, max_pending: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AdmissionState {
                active: 0,
                max_concurrent: max_concurrent.max(1),
                max_pending,
                closed: false,
                queue: PriorityQueue::new(),
            }),
            rejected: AtomicU64::new(0),
        })
    }

    /// Wait for a slot.
    ///
    /// Returns immediately when below the ceiling, fails immediately with
    /// `Overloaded` when the queue is full or `ShuttingDown` after
    /// [`close`](Self::close), and otherwise suspends until a slot is handed
    /// over.
    pub async fn acquire(self: &Arc<Self>, priority: Priority) -> Result<AdmissionPermit, ResolveError> {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ResolveError::ShuttingDown);
            }
            if state.active < state.max_concurrent {
                state.active += 1;
                trace!(active = state.active, "Admitted immediately");
                return Ok(AdmissionPermit::new(Arc::clone(self)));
            }
            if state.queue.len() >= state.max_pending {
                state.queue.retain(|grant| !grant.is_closed());
            }
            if state.queue.len() >= state.max_pending {
                let capacity = state.max_pending;
                drop(state);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(capacity, "Admission queue full, rejecting request");
                return Err(ResolveError::Overloaded { capacity });
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push(priority, tx);
            debug!(
                priority,
                queued = state.queue.len(),
                active = state.active,
                "Request queued for admission"
            );
            rx
        };

        let mut waiter = QueuedWaiter {
            rx,
            controller: self,
            settled: false,
        };
        waiter.wait().await
    }

    /// Free one slot: hand it to the next live waiter or decrement.
    fn release(&self) {
        let mut state = self.state.lock();
        if state.active <= state.max_concurrent {
            while let Some(next) = state.queue.pop() {
                if next.item.send(Ok(())).is_ok() {
                    trace!(priority = next.priority, "Slot handed to queued request");
                    return;
                }
                // Waiter went away; try the next one
            }
        }
        debug_assert!(state.active > 0, "admission release without a permit");
        state.active = state.active.saturating_sub(1);
    }

    /// Drop queue entries whose requester has stopped waiting.
    fn prune_abandoned(&self) {
        let removed = self.state.lock().queue.retain(|grant| !grant.is_closed());
        if removed > 0 {
            trace!(removed, "Pruned abandoned admission waiters");
        }
    }

    /// Change the limits. Raising the ceiling admits queued requests.
    pub fn set_limits(&self, max_concurrent: usize, max_pending: usize) {
        let mut state = self.state.lock();
        state.max_concurrent = max_concurrent.max(1);
        state.max_pending = max_pending;
        while state.active < state.max_concurrent {
            let Some(next) = state.queue.pop() else { break };
            if next.item.send(Ok(())).is_ok() {
                state.active += 1;
            }
        }
        debug!(
            max_concurrent = state.max_concurrent,
            max_pending, "Admission limits updated"
        );
    }

    /// Refuse new requests and reject everything still queued. Idempotent.
    ///
    /// Returns the number of queued requests that were rejected.
    pub fn close(&self) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.closed = true;
            state.queue.drain_ordered()
        };
        let rejected = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(Err(ResolveError::ShuttingDown));
        }
        if rejected > 0 {
            debug!(rejected, "Rejected queued requests on close");
        }
        rejected
    }

    /// Resolutions currently holding a slot.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Requests refused with `Overloaded`.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Snapshot of the controller state.
    pub fn stats(&self) -> AdmissionStatsSnapshot {
        let state = self.state.lock();
        // Ages beyond u64::MAX ms are not meaningful
        #[allow(clippy::cast_possible_truncation)]
        let oldest_pending_age_ms = state
            .queue
            .oldest_age()
            .map_or(0, |age| age.as_millis() as u64);
        AdmissionStatsSnapshot {
            active: state.active,
            queued: state.queue.len(),
            max_concurrent: state.max_concurrent,
            queue_capacity: state.max_pending,
            utilization_percent: state.active as f64 / state.max_concurrent as f64 * 100.0,
            rejected: self.rejected(),
            oldest_pending_age_ms,
        }
    }
}

/// A queued request's wait for its slot.
///
/// If the waiting future is dropped after the slot was granted but before it
/// was observed, the slot is released here so it is not lost.
struct QueuedWaiter<'a> {
    rx: oneshot::Receiver<Result<(), ResolveError>>,
    controller: &'a Arc<AdmissionController>,
    settled: bool,
}

impl QueuedWaiter<'_> {
    async fn wait(&mut self) -> Result<AdmissionPermit, ResolveError> {
        let outcome = (&mut self.rx).await;
        self.settled = true;
        match outcome {
            Ok(Ok(())) => Ok(AdmissionPermit::new(Arc::clone(self.controller))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ResolveError::ShuttingDown),
        }
    }
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if let Ok(Ok(())) = self.rx.try_recv() {
            self.controller.release();
        } else {
            self.controller.prune_abandoned();
        }
    }
}

/// A held admission slot. Dropping it releases the slot.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl AdmissionPermit {
    fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}
