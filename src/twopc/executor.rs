//! Job Executors
//!
//! A phase turns each participating branch into a [`Job`] and hands it to an
//! [`Executor`]. The synchronous executor runs jobs on the calling thread;
//! the asynchronous one runs them on a fixed pool of worker threads fed by a
//! crossbeam channel.
//!
//! A job that panics completes with `CoordError::IllegalState` instead of
//! taking the worker down.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{CoordError, Result};

/// One resource call for one phase
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Runs jobs
pub trait Executor: Send + Sync {
    fn submit(&self, job: Job) -> JobHandle;

    /// Stop accepting jobs and release worker threads
    fn shutdown(&self) {}
}

/// Completion of a submitted job
pub struct JobHandle {
    inner: HandleInner,
}

enum HandleInner {
    Ready(Result<()>),
    Pending(Receiver<Result<()>>),
}

impl JobHandle {
    /// A handle for a job that already finished
    pub fn ready(result: Result<()>) -> Self {
        Self {
            inner: HandleInner::Ready(result),
        }
    }

    fn pending(receiver: Receiver<Result<()>>) -> Self {
        Self {
            inner: HandleInner::Pending(receiver),
        }
    }

    /// Block until the job finishes.
    ///
    /// Returns `None` when `timeout` elapses first; the job itself keeps
    /// running to completion on its worker.
    pub fn wait(self, timeout: Option<Duration>) -> Option<Result<()>> {
        match self.inner {
            HandleInner::Ready(result) => Some(result),
            HandleInner::Pending(receiver) => match timeout {
                Some(timeout) => match receiver.recv_timeout(timeout) {
                    Ok(result) => Some(result),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(Err(worker_lost())),
                },
                None => Some(receiver.recv().unwrap_or_else(|_| Err(worker_lost()))),
            },
        }
    }
}

fn worker_lost() -> CoordError {
    CoordError::IllegalState("executor worker exited before completing the job".to_string())
}

fn run_job(job: Job) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("phase job panicked");
            Err(CoordError::IllegalState("phase job panicked".to_string()))
        }
    }
}

// =============================================================================
// Synchronous
// =============================================================================

/// Runs each job inline on the submitting thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncExecutor;

impl SyncExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SyncExecutor {
    fn submit(&self, job: Job) -> JobHandle {
        JobHandle::ready(run_job(job))
    }
}

// =============================================================================
// Asynchronous
// =============================================================================

struct Task {
    job: Job,
    done: Sender<Result<()>>,
}

/// Fixed-size worker pool
pub struct AsyncExecutor {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncExecutor {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = channel::unbounded::<Task>();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("xacoord-2pc-{}", id))
                .spawn(move || {
                    for task in receiver.iter() {
                        // the waiter may have timed out and gone away
                        let _ = task.done.send(run_job(task.job));
                    }
                    tracing::trace!(worker = id, "2pc worker exiting");
                })?;
            workers.push(handle);
        }

        tracing::debug!(threads, "started async 2pc executor");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Executor for AsyncExecutor {
    fn submit(&self, job: Job) -> JobHandle {
        let sender = match self.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => {
                return JobHandle::ready(Err(CoordError::IllegalState(
                    "executor has been shut down".to_string(),
                )))
            }
        };

        let (done, receiver) = channel::bounded(1);
        match sender.send(Task { job, done }) {
            Ok(()) => JobHandle::pending(receiver),
            Err(_) => JobHandle::ready(Err(worker_lost())),
        }
    }

    fn shutdown(&self) {
        // dropping the sender ends every worker's receive loop
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("2pc worker thread panicked");
            }
        }
        tracing::debug!("async 2pc executor stopped");
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
