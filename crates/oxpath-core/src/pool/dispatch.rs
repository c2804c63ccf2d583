//! Task dispatch for the worker pool.
//!
//! Submitted tasks wait in a priority queue. [`Dispatcher::pump`] walks the
//! worker slots and hands tasks to every worker with spare capacity until
//! the queue is empty or all workers are saturated. It runs on submission,
//! whenever a worker finishes or abandons a task, and when a worker comes up.
//!
//! # Exactly-once settlement
//!
//! A task can end three ways: the worker finishes it, the caller's deadline
//! fires, or the worker dies. Each [`TaskTicket`] is settled by exactly one
//! of these, and the in-flight unit it holds on its worker is released
//! exactly once by taking it out of the ticket.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tracing::trace;

use super::worker::{WorkerLoad, WorkerSlot};
use crate::queue::{Priority, PriorityQueue};
use crate::stats::PoolStatsSnapshot;

/// Result of one existence check as produced by a probe.
pub(crate) type CheckOutcome = io::Result<bool>;

/// A unit of work for a worker.
pub(crate) struct Task {
    pub(crate) path: PathBuf,
    pub(crate) reply: oneshot::Sender<CheckOutcome>,
    pub(crate) ticket: Arc<TaskTicket>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("path", &self.path)
            .field("settled", &self.ticket.is_settled())
            .finish_non_exhaustive()
    }
}

/// Shared state between a task's caller and the worker running it.
#[derive(Debug, Default)]
pub(crate) struct TaskTicket {
    settled: AtomicBool,
    assigned: Mutex<Option<Arc<WorkerLoad>>>,
    cancel: Notify,
}

impl TaskTicket {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the right to settle this task. `true` for exactly one caller.
    pub(crate) fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Charge this task to a worker. Fails if the task is already settled.
    pub(crate) fn assign(&self, load: &Arc<WorkerLoad>) -> bool {
        let mut assigned = self.assigned.lock();
        if self.is_settled() {
            return false;
        }
        load.acquire();
        *assigned = Some(Arc::clone(load));
        true
    }

    /// Release the worker capacity held by this task, if any.
    pub(crate) fn release_slot(&self) {
        if let Some(load) = self.assigned.lock().take() {
            load.release();
        }
    }

    /// Ask the worker to stop running the check.
    pub(crate) fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.notified().await;
    }
}

/// Pool counters.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) restarts: AtomicU64,
}

impl PoolStats {
    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: &CheckOutcome) {
        if outcome.is_ok() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pending queue plus worker slots.
pub(crate) struct Dispatcher {
    pending: Mutex<PriorityQueue<Task>>,
    slots: Box<[WorkerSlot]>,
    max_tasks_per_worker: usize,
    terminated: AtomicBool,
    pub(crate) stats: PoolStats,
}

impl Dispatcher {
    pub(crate) fn new(workers: usize, max_tasks_per_worker: usize) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(PriorityQueue::new()),
            slots: (0..workers).map(WorkerSlot::new).collect(),
            max_tasks_per_worker: max_tasks_per_worker.max(1),
            terminated: AtomicBool::new(false),
            stats: PoolStats::default(),
        })
    }

    pub(crate) fn slot(&self, index: usize) -> &WorkerSlot {
        &self.slots[index]
    }

    pub(crate) fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Mark terminated. Returns `false` if it already was.
    pub(crate) fn mark_terminated(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    /// Queue a task and dispatch what fits.
    pub(crate) fn submit(&self, task: Task, priority: Priority) {
        self.stats.record_submit();
        self.pending.lock().push(priority, task);
        self.pump();
    }

    /// Assign queued tasks to workers with spare capacity.
    pub(crate) fn pump(&self) {
        if self.is_terminated() {
            return;
        }
        let mut pending = self.pending.lock();

        'slots: for slot in &*self.slots {
            let Some(worker) = slot.handle() else {
                continue;
            };
            while worker.load.in_flight() < self.max_tasks_per_worker {
                let Some((queued, sequence)) = pending.pop_with_sequence() else {
                    break 'slots;
                };
                let ticket = Arc::clone(&queued.item.ticket);
                if queued.item.reply.is_closed() && ticket.settle() {
                    trace!(path = %queued.item.path.display(), "Dropping task whose caller left");
                    continue;
                }
                if !ticket.assign(&worker.load) {
                    // Deadline passed while queued
                    continue;
                }

                let priority = queued.priority;
                let enqueued_at = queued.enqueued_at;
                match worker.tx.send(queued.item) {
                    Ok(()) => {
                        trace!(
                            worker_id = slot.id(),
                            priority,
                            in_flight = worker.load.in_flight(),
                            "Task dispatched"
                        );
                    }
                    Err(rejected) => {
                        // Worker is gone (crashed, restart pending); keep the task
                        ticket.release_slot();
                        pending.requeue(
                            crate::queue::Dequeued {
                                item: rejected.0,
                                priority,
                                enqueued_at,
                            },
                            sequence,
                        );
                        continue 'slots;
                    }
                }
            }
        }
    }

    /// Drop every queued task. Callers observe a closed channel.
    pub(crate) fn drain_pending(&self) -> usize {
        let drained = self.pending.lock().drain_ordered();
        let count = drained.len();
        for task in drained {
            task.ticket.settle();
        }
        count
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            workers: self.slots.len(),
            max_tasks_per_worker: self.max_tasks_per_worker,
            in_flight_per_worker: self.slots.iter().map(WorkerSlot::in_flight).collect(),
            pending: self.pending_len(),
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            restarts: self.stats.restarts.load(Ordering::Relaxed),
            terminated: self.is_terminated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_settles_once() {
        let ticket = TaskTicket::new();
        assert!(!ticket.is_settled());
        assert!(ticket.settle());
        assert!(!ticket.settle());
        assert!(ticket.is_settled());
    }

    #[test]
    fn test_assign_and_release_exactly_once() {
        let load = Arc::new(WorkerLoad::default());
        let ticket = TaskTicket::new();

        assert!(ticket.assign(&load));
        assert_eq!(load.in_flight(), 1);

        ticket.release_slot();
        ticket.release_slot();
        assert_eq!(load.in_flight(), 0);
    }

    #[test]
    fn test_assign_refused_after_settle() {
        let load = Arc::new(WorkerLoad::default());
        let ticket = TaskTicket::new();
        ticket.settle();

        assert!(!ticket.assign(&load));
        assert_eq!(load.in_flight(), 0);
    }

    #[test]
    fn test_pump_without_workers_keeps_tasks_pending() {
        let dispatcher = Dispatcher::new(2, 4);
        let (reply, _rx) = oneshot::channel();
        dispatcher.submit(
            Task {
                path: PathBuf::from("/a"),
                reply,
                ticket: TaskTicket::new(),
            },
            0,
        );

        assert_eq!(dispatcher.pending_len(), 1);
        assert_eq!(dispatcher.drain_pending(), 1);
        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(dispatcher.snapshot().submitted, 1);
    }

    fn task(path: &str) -> (Task, oneshot::Receiver<CheckOutcome>) {
        let (reply, rx) = oneshot::channel();
        let task = Task {
            path: PathBuf::from(path),
            reply,
            ticket: TaskTicket::new(),
        };
        (task, rx)
    }

    #[tokio::test]
    async fn test_saturated_worker_receives_by_priority() {
        use crate::pool::worker::WorkerHandle;
        use tokio::sync::mpsc;

        let dispatcher = Dispatcher::new(1, 1);
        let (tx, mut worker_rx) = mpsc::unbounded_channel();
        let idle = tokio::spawn(std::future::pending::<()>());
        dispatcher.slot(0).install(WorkerHandle {
            tx,
            load: Arc::new(WorkerLoad::default()),
            abort: idle.abort_handle(),
        });

        // Occupies the only slot; everything after it queues
        let mut replies = Vec::new();
        for (path, priority) in [
            ("/first", 0),
            ("/low", 0),
            ("/high", 10),
            ("/mid", 5),
            ("/low-2", 0),
            ("/urgent", 10),
        ] {
            let (task, rx) = task(path);
            replies.push(rx);
            dispatcher.submit(task, priority);
        }
        assert_eq!(dispatcher.pending_len(), 5);
        assert_eq!(dispatcher.slot(0).in_flight(), 1);

        let mut order = Vec::new();
        while let Ok(running) = worker_rx.try_recv() {
            order.push(running.path.display().to_string());
            assert!(running.ticket.settle());
            running.ticket.release_slot();
            dispatcher.pump();
        }

        assert_eq!(
            order,
            vec!["/first", "/high", "/urgent", "/mid", "/low", "/low-2"]
        );
        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(dispatcher.slot(0).in_flight(), 0);
        idle.abort();
    }
}
