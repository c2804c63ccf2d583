//! Worker tasks.
//!
//! A worker runs up to `max_tasks_per_worker` checks concurrently. Checks
//! are polled from a `FuturesUnordered` inside the worker task itself, so a
//! panicking probe takes the whole worker down. The supervisor notices and
//! starts a fresh incarnation in the same slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;

use super::dispatch::{CheckOutcome, Dispatcher, Task};
use crate::probe::PathProbe;

/// In-flight counter of one worker incarnation.
#[derive(Debug, Default)]
pub(crate) struct WorkerLoad {
    in_flight: AtomicUsize,
}

impl WorkerLoad {
    pub(crate) fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        // Saturating: a stale release must never wrap the counter
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Handle to a running worker incarnation.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    pub(crate) tx: mpsc::UnboundedSender<Task>,
    pub(crate) load: Arc<WorkerLoad>,
    pub(crate) abort: AbortHandle,
}

/// A fixed position in the pool. Holds whichever incarnation is current.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    id: usize,
    current: RwLock<Option<WorkerHandle>>,
}

impl WorkerSlot {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            current: RwLock::new(None),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn install(&self, handle: WorkerHandle) {
        *self.current.write() = Some(handle);
    }

    pub(crate) fn handle(&self) -> Option<WorkerHandle> {
        self.current.read().clone()
    }

    pub(crate) fn take(&self) -> Option<WorkerHandle> {
        self.current.write().take()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.current
            .read()
            .as_ref()
            .map_or(0, |handle| handle.load.in_flight())
    }
}

/// Worker main loop. Returns when its channel closes.
pub(crate) async fn run_worker(
    worker_id: usize,
    mut rx: mpsc::UnboundedReceiver<Task>,
    probe: Arc<dyn PathProbe>,
    dispatcher: Weak<Dispatcher>,
) {
    let mut running = FuturesUnordered::new();
    trace!(worker_id, "Worker started");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(task) => running.push(run_check(task, Arc::clone(&probe))),
                None => break,
            },
            Some((task, outcome)) = running.next(), if !running.is_empty() => {
                finish(worker_id, task, outcome, &dispatcher);
            }
        }
    }

    trace!(worker_id, abandoned = running.len(), "Worker stopped");
}

/// Run one check, giving up early if the caller's deadline fires.
async fn run_check(task: Task, probe: Arc<dyn PathProbe>) -> (Task, Option<CheckOutcome>) {
    let outcome = tokio::select! {
        result = probe.exists(&task.path) => Some(result),
        () = task.ticket.cancelled() => None,
    };
    (task, outcome)
}

fn finish(
    worker_id: usize,
    task: Task,
    outcome: Option<CheckOutcome>,
    dispatcher: &Weak<Dispatcher>,
) {
    let Some(dispatcher) = dispatcher.upgrade() else {
        return;
    };

    match outcome {
        Some(result) if task.ticket.settle() => {
            task.ticket.release_slot();
            dispatcher.stats.record_outcome(&result);
            if task.reply.send(result).is_err() {
                trace!(worker_id, path = %task.path.display(), "Caller left before result");
            }
        }
        Some(_) => {
            trace!(worker_id, path = %task.path.display(), "Late result dropped");
        }
        None => {
            trace!(worker_id, path = %task.path.display(), "Check cancelled at deadline");
        }
    }

    dispatcher.pump();
}
