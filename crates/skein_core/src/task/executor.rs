//! # Task Executor
//!
//! A fixed pool of named worker threads draining one shared queue.
//!
//! ```text
//! execute(job) ──► [crossbeam queue] ──► worker-0 .. worker-N
//!                          ▲
//!        sync_until(..) ───┘  (the waiting thread drains the queue too)
//! ```
//!
//! With zero workers the executor is synchronous: every job runs inline on the
//! thread that submits it.
//!
//! Panics inside jobs are caught, logged, and returned from the next
//! [`TaskExecutor::sync_until`] or [`TaskExecutor::sync_point`] as
//! [`SchedulerError::TaskPanicked`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};

use crate::config::SkeinConfig;
use crate::error::{SchedulerError, SchedulerResult};

/// A unit of work accepted by the executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Upper bound on a single wait inside `sync_until` before re-checking.
const PROGRESS_WAIT: Duration = Duration::from_millis(1);

enum Message {
    Run(Job),
    Shutdown,
}

/// State shared between the executor handle and its workers.
struct ExecutorState {
    /// Jobs queued or running.
    pending: AtomicUsize,
    /// Panics caught since the last sync.
    failures: Mutex<Vec<SchedulerError>>,
    progress_lock: Mutex<()>,
    progress: Condvar,
}

impl ExecutorState {
    fn run(&self, job: Job) {
        self.run_guarded(job);
        self.pending.fetch_sub(1, Ordering::AcqRel);
        let _guard = self.progress_lock.lock();
        self.progress.notify_all();
    }

    fn run_guarded(&self, work: impl FnOnce()) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => true,
            Err(payload) => {
                let thread = thread::current().name().unwrap_or("unnamed").to_owned();
                let message = panic_message(payload.as_ref());
                tracing::error!(thread = %thread, message = %message, "task panicked");
                self.failures
                    .lock()
                    .push(SchedulerError::TaskPanicked { thread, message });
                false
            }
        }
    }

    fn take_failure(&self) -> SchedulerResult<()> {
        let mut failures = self.failures.lock();
        if failures.is_empty() {
            return Ok(());
        }
        let first = failures.remove(0);
        if !failures.is_empty() {
            tracing::warn!(dropped = failures.len(), "additional task failures in the same sync");
            failures.clear();
        }
        Err(first)
    }

    fn wait_for_progress(&self) {
        let mut guard = self.progress_lock.lock();
        let _ = self.progress.wait_for(&mut guard, PROGRESS_WAIT);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Runs closures and records their panics against an executor.
///
/// Plans wrap each leaf with this so that a failing leaf still lets its
/// barrier count down.
#[derive(Clone)]
pub struct TaskGuard {
    state: Arc<ExecutorState>,
}

impl TaskGuard {
    /// Runs `work`, catching and recording a panic.
    ///
    /// # Returns
    ///
    /// True if `work` returned normally.
    pub fn run(&self, work: impl FnOnce()) -> bool {
        self.state.run_guarded(work)
    }
}

/// Worker pool with a shared queue.
///
/// Shared as `Arc<TaskExecutor>`; plans hold a clone while their continuations
/// are in flight.
pub struct TaskExecutor {
    name: String,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: AtomicUsize,
    state: Arc<ExecutorState>,
}

impl TaskExecutor {
    /// Creates an executor with `worker_count` worker threads.
    ///
    /// Zero workers gives a synchronous executor.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::WorkerSpawn`] if a thread cannot be started.
    pub fn new(name: impl Into<String>, worker_count: usize) -> SchedulerResult<Arc<Self>> {
        let name = name.into();
        let (sender, receiver) = unbounded();
        let state = Arc::new(ExecutorState {
            pending: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            progress_lock: Mutex::new(()),
            progress: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver: Receiver<Message> = receiver.clone();
            let state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || {
                    while let Ok(Message::Run(job)) = receiver.recv() {
                        state.run(job);
                    }
                })
                .map_err(|e| SchedulerError::WorkerSpawn(e.to_string()))?;
            workers.push(handle);
        }

        tracing::info!(executor = %name, workers = worker_count, "task executor started");

        Ok(Arc::new(Self {
            name,
            sender,
            receiver,
            workers: Mutex::new(workers),
            worker_count: AtomicUsize::new(worker_count),
            state,
        }))
    }

    /// Creates an executor sized from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::WorkerSpawn`] if a thread cannot be started.
    pub fn from_config(config: &SkeinConfig) -> SchedulerResult<Arc<Self>> {
        Self::new("skein", config.resolved_worker_count())
    }

    /// Returns the executor's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    /// Returns true if jobs run inline on the submitting thread.
    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.worker_count() == 0
    }

    /// Returns the number of jobs queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Returns a guard that records panics against this executor.
    #[must_use]
    pub fn guard(&self) -> TaskGuard {
        TaskGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Submits a job.
    ///
    /// Runs inline when the executor has no workers.
    pub fn execute(&self, job: Job) {
        self.state.pending.fetch_add(1, Ordering::AcqRel);
        if self.is_synchronous() {
            self.state.run(job);
            return;
        }
        if let Err(rejected) = self.sender.send(Message::Run(job)) {
            if let Message::Run(job) = rejected.into_inner() {
                self.state.run(job);
            }
        }
    }

    /// Blocks until `condition` holds, draining queued jobs on the calling
    /// thread while waiting.
    ///
    /// # Returns
    ///
    /// `Ok(true)` once the condition holds. `Ok(false)` if the executor went
    /// idle with the condition still false, since no pending work can change
    /// it any more.
    ///
    /// # Errors
    ///
    /// Returns the first panic caught in a job since the previous sync.
    pub fn sync_until(&self, mut condition: impl FnMut() -> bool) -> SchedulerResult<bool> {
        let satisfied = loop {
            if condition() {
                break true;
            }
            match self.receiver.try_recv() {
                Ok(Message::Run(job)) => self.state.run(job),
                Ok(Message::Shutdown) | Err(TryRecvError::Disconnected) => break condition(),
                Err(TryRecvError::Empty) => {
                    if self.pending() == 0 {
                        break condition();
                    }
                    self.state.wait_for_progress();
                }
            }
        };
        self.state.take_failure()?;
        Ok(satisfied)
    }

    /// Blocks until every submitted job has finished.
    ///
    /// # Errors
    ///
    /// Returns the first panic caught in a job since the previous sync.
    pub fn sync_point(&self) -> SchedulerResult<()> {
        self.sync_until(|| self.pending() == 0).map(|_| ())
    }

    /// Stops the workers after the queue drains.
    ///
    /// Jobs submitted afterwards run inline. When called from one of the
    /// executor's own workers, as happens when a plan continuation drops the
    /// last handle, that worker is detached and exits once its job returns.
    pub fn shutdown(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        self.worker_count.store(0, Ordering::Release);
        for _ in &workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                tracing::debug!(executor = %self.name, "shutdown from a worker, detaching it");
                continue;
            }
            if worker.join().is_err() {
                tracing::error!(executor = %self.name, "worker thread exited abnormally");
            }
        }
        tracing::debug!(executor = %self.name, "task executor stopped");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("name", &self.name)
            .field("workers", &self.worker_count())
            .field("pending", &self.pending())
            .finish()
    }
}
