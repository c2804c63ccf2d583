//! Worker supervision.
//!
//! One supervisor task per slot. It spawns a worker, installs it, and waits
//! for it to exit. A worker that panicked is replaced immediately; the
//! checks it was running are lost and their callers see the reply channel
//! close. Any other exit ends supervision of that slot.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::dispatch::Dispatcher;
use super::worker::{WorkerHandle, WorkerLoad, run_worker};
use crate::probe::PathProbe;

pub(crate) struct Supervisor {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("slots", &self.tasks.lock().len())
            .finish()
    }
}

impl Supervisor {
    pub(crate) fn start(
        runtime: &Handle,
        dispatcher: &Arc<Dispatcher>,
        probe: &Arc<dyn PathProbe>,
    ) -> Self {
        let tasks = (0..dispatcher.slots().len())
            .map(|index| {
                runtime.spawn(supervise(
                    index,
                    Arc::clone(dispatcher),
                    Arc::clone(probe),
                ))
            })
            .collect();
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    /// Abort all supervisor tasks. Idempotent.
    pub(crate) fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn supervise(index: usize, dispatcher: Arc<Dispatcher>, probe: Arc<dyn PathProbe>) {
    let mut incarnation: u64 = 0;

    while !dispatcher.is_terminated() {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            index,
            rx,
            Arc::clone(&probe),
            Arc::downgrade(&dispatcher),
        ));
        let installed = install_unless_terminated(
            &dispatcher,
            index,
            WorkerHandle {
                tx,
                load: Arc::new(WorkerLoad::default()),
                abort: worker.abort_handle(),
            },
        );
        if !installed {
            break;
        }
        debug!(worker_id = index, incarnation, "Worker installed");
        dispatcher.pump();

        match worker.await {
            Ok(()) => {
                debug!(worker_id = index, "Worker exited");
                break;
            }
            Err(e) if e.is_panic() => {
                if dispatcher.is_terminated() {
                    break;
                }
                warn!(worker_id = index, incarnation, "Worker crashed, restarting");
                dispatcher.stats.record_restart();
                incarnation += 1;
            }
            Err(_) => break,
        }
    }

    retire(&dispatcher, index);
}

/// Install `handle` in its slot unless the pool has been terminated.
///
/// `terminate` may empty the slots between the loop's check and the install;
/// the re-check afterwards retires a worker that would otherwise hold its
/// channel forever.
fn install_unless_terminated(dispatcher: &Dispatcher, index: usize, handle: WorkerHandle) -> bool {
    dispatcher.slot(index).install(handle);
    if dispatcher.is_terminated() {
        retire(dispatcher, index);
        return false;
    }
    true
}

fn retire(dispatcher: &Dispatcher, index: usize) {
    if let Some(handle) = dispatcher.slot(index).take() {
        handle.abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_worker() -> (JoinHandle<()>, WorkerHandle) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(std::future::pending::<()>());
        let handle = WorkerHandle {
            tx,
            load: Arc::new(WorkerLoad::default()),
            abort: worker.abort_handle(),
        };
        (worker, handle)
    }

    #[tokio::test]
    async fn test_install_on_live_pool() {
        let dispatcher = Dispatcher::new(1, 1);
        let (worker, handle) = idle_worker();

        assert!(install_unless_terminated(&dispatcher, 0, handle));
        assert!(dispatcher.slot(0).handle().is_some());

        retire(&dispatcher, 0);
        assert!(dispatcher.slot(0).handle().is_none());
        assert!(worker.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_install_after_terminate_retires_worker() {
        let dispatcher = Dispatcher::new(1, 1);
        assert!(dispatcher.mark_terminated());
        let (worker, handle) = idle_worker();

        assert!(!install_unless_terminated(&dispatcher, 0, handle));
        assert!(dispatcher.slot(0).handle().is_none());
        assert!(worker.await.unwrap_err().is_cancelled());
    }
}
