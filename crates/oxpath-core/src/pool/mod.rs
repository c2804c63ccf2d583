//! Bounded worker pool for existence checks.
//!
//! A fixed number of workers each run up to `max_tasks_per_worker` checks at
//! once. Work beyond that waits in a priority queue and is handed out as
//! workers free up.
//!
//! # Deadlines
//!
//! Each [`WorkerPool::check_path`] call has a deadline of `task_timeout`
//! measured from submission, so time spent queued counts. When it fires the
//! caller gets [`ResolveError::Timeout`], the worker's capacity is released
//! and the check future is dropped. A result that races in afterwards is
//! discarded.
//!
//! # Crash recovery
//!
//! A panicking probe kills its worker. The supervisor replaces it in the
//! same slot. Callers whose checks were on the dead worker receive
//! [`ResolveError::AccessError`]; queued work is unaffected.

mod dispatch;
mod supervisor;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::config::{DEFAULT_MAX_TASKS_PER_WORKER, DEFAULT_WORKER_TIMEOUT, ResolverConfig};
use crate::error::ResolveError;
use crate::probe::PathProbe;
use crate::queue::Priority;
use crate::stats::PoolStatsSnapshot;
use dispatch::{CheckOutcome, Dispatcher, Task, TaskTicket};
use supervisor::Supervisor;

/// Worker pool sizing and deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers.
    pub workers: usize,
    /// Concurrent checks per worker.
    pub max_tasks_per_worker: usize,
    /// Deadline per check, measured from submission.
    pub task_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: ResolverConfig::default().effective_worker_count(),
            max_tasks_per_worker: DEFAULT_MAX_TASKS_PER_WORKER,
            task_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Derive pool settings from a resolver configuration.
    pub fn from_resolver(config: &ResolverConfig) -> Self {
        Self {
            workers: config.effective_worker_count(),
            max_tasks_per_worker: config.max_tasks_per_worker,
            task_timeout: config.worker_timeout,
        }
    }
}

/// Errors starting a pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Not called from within a tokio runtime.
    #[error("worker pool requires a tokio runtime")]
    NoRuntime,

    /// A pool needs at least one worker.
    #[error("worker pool needs at least one worker")]
    NoWorkers,
}

/// Bounded pool of check workers.
pub struct WorkerPool {
    config: PoolConfig,
    dispatcher: Arc<Dispatcher>,
    supervisor: Supervisor,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("terminated", &self.is_terminated())
            .field("pending", &self.dispatcher.pending_len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Start the pool on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoRuntime`] outside a runtime, [`PoolError::NoWorkers`]
    /// if `config.workers` is zero.
    pub fn start(config: PoolConfig, probe: Arc<dyn PathProbe>) -> Result<Self, PoolError> {
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let dispatcher = Dispatcher::new(config.workers, config.max_tasks_per_worker);
        let supervisor = Supervisor::start(&runtime, &dispatcher, &probe);

        info!(
            workers = config.workers,
            max_tasks_per_worker = config.max_tasks_per_worker,
            task_timeout_ms = config.task_timeout.as_millis(),
            "Worker pool started"
        );

        Ok(Self {
            config,
            dispatcher,
            supervisor,
        })
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check whether `path` exists on a worker.
    ///
    /// Returns `path` when it exists.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::NotFound`] if the path does not exist
    /// - [`ResolveError::AccessError`] if the check failed or its worker died
    /// - [`ResolveError::Timeout`] if no result arrived within the deadline
    /// - [`ResolveError::ShuttingDown`] if the pool was terminated
    pub async fn check_path(
        &self,
        path: PathBuf,
        priority: Priority,
    ) -> Result<PathBuf, ResolveError> {
        if self.is_terminated() {
            return Err(ResolveError::ShuttingDown);
        }

        let ticket = TaskTicket::new();
        let (reply, mut rx) = oneshot::channel();
        let _guard = AbandonGuard {
            ticket: Arc::clone(&ticket),
            dispatcher: &self.dispatcher,
        };
        self.dispatcher.submit(
            Task {
                path: path.clone(),
                reply,
                ticket: Arc::clone(&ticket),
            },
            priority,
        );

        match tokio::time::timeout(self.config.task_timeout, &mut rx).await {
            Ok(Ok(outcome)) => map_outcome(path, outcome),
            Ok(Err(_closed)) => {
                ticket.settle();
                ticket.release_slot();
                if self.is_terminated() {
                    Err(ResolveError::ShuttingDown)
                } else {
                    debug!(path = %path.display(), "Worker lost while checking");
                    Err(ResolveError::worker_lost(path))
                }
            }
            Err(_elapsed) => {
                if ticket.settle() {
                    ticket.release_slot();
                    ticket.cancel();
                    self.dispatcher.stats.record_timeout();
                    self.dispatcher.pump();
                    trace!(path = %path.display(), "Check deadline exceeded");
                    return Err(ResolveError::Timeout {
                        path,
                        timeout: self.config.task_timeout,
                    });
                }
                // Worker settled first; its reply is already on the way
                match rx.await {
                    Ok(outcome) => map_outcome(path, outcome),
                    Err(_closed) => Err(ResolveError::worker_lost(path)),
                }
            }
        }
    }

    /// Stop all workers and fail queued work. Idempotent.
    pub fn terminate(&self) {
        if !self.dispatcher.mark_terminated() {
            return;
        }
        self.supervisor.stop();
        for slot in self.dispatcher.slots() {
            if let Some(handle) = slot.take() {
                handle.abort.abort();
            }
        }
        let dropped = self.dispatcher.drain_pending();
        info!(dropped_pending = dropped, "Worker pool terminated");
    }

    /// Whether [`terminate`](Self::terminate) has run.
    pub fn is_terminated(&self) -> bool {
        self.dispatcher.is_terminated()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.dispatcher.snapshot()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Settles the ticket if the calling future is dropped mid-flight.
struct AbandonGuard<'a> {
    ticket: Arc<TaskTicket>,
    dispatcher: &'a Dispatcher,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.ticket.settle() {
            self.ticket.release_slot();
            self.ticket.cancel();
            self.dispatcher.pump();
        }
    }
}

fn map_outcome(path: PathBuf, outcome: CheckOutcome) -> Result<PathBuf, ResolveError> {
    match outcome {
        Ok(true) => Ok(path),
        Ok(false) => Err(ResolveError::not_found(path.display().to_string())),
        Err(source) => Err(ResolveError::AccessError { path, source }),
    }
}
