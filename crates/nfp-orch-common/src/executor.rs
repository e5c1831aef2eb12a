//! Scatter/gather execution of blocking jobs.
//!
//! Several lifecycle steps need to query or act on independent backends (for
//! example health checks across many devices). Running them serially would
//! multiply latency, so the orchestration loop batches them into a
//! [`TaskExecutor`], fires the batch and waits for every job before it
//! resumes single-threaded processing.
//!
//! # Batch Lifecycle
//!
//! ```text
//!   add_job()* ──> fire() ──(all jobs complete)──> results returned, batch reset
//!                    │
//!                    └── add_job()/fire() while fired ──> ExecutorError::InUse
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::task::{TaskError, TaskResult};

/// Boxed job function. Arguments are captured by the closure.
type JobFn<T> = Box<dyn FnOnce() -> TaskResult<T> + Send + 'static>;

/// Caller-owned correlation map, written with a job's result under its id.
pub type ResultStore<T> = Arc<DashMap<String, TaskResult<T>>>;

/// Error type for executor misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The current batch has already been fired
    #[error("Task executor in use: batch already fired")]
    InUse,

    /// The worker pool refused new work
    #[error("Worker pool closed")]
    PoolClosed,
}

/// A queued job.
struct Job<T> {
    /// Job identifier (unique within a batch)
    id: String,
    /// Label of the operation, used for logging
    method: String,
    func: JobFn<T>,
    result_store: Option<ResultStore<T>>,
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("has_result_store", &self.result_store.is_some())
            .finish()
    }
}

/// Record of a finished job.
#[derive(Debug, Clone)]
pub struct CompletedJob<T> {
    /// Job identifier
    pub id: String,
    /// Operation label
    pub method: String,
    /// What the job function returned
    pub result: TaskResult<T>,
}

struct ExecutorState<T> {
    jobs: Vec<Job<T>>,
    fired: bool,
}

/// Clears the fired flag when the batch ends, including when the `fire()`
/// future is dropped early.
struct FiredGuard<'a, T> {
    state: &'a Mutex<ExecutorState<T>>,
}

impl<T> Drop for FiredGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.fired = false;
    }
}

/// Scatter/gather executor backed by a bounded pool of blocking workers.
///
/// All methods take `&self`, so the executor can be shared behind an `Arc`
/// and a concurrent `add_job` during a fired batch is rejected rather than
/// silently joining the wrong batch.
pub struct TaskExecutor<T> {
    max_workers: usize,
    workers: Arc<Semaphore>,
    state: Mutex<ExecutorState<T>>,
}

impl<T> TaskExecutor<T>
where
    T: Send + 'static,
{
    /// Default number of concurrently running jobs.
    pub const DEFAULT_MAX_WORKERS: usize = 16;

    /// Creates an executor running at most `max_workers` jobs at once.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            workers: Arc::new(Semaphore::new(max_workers)),
            state: Mutex::new(ExecutorState {
                jobs: Vec::new(),
                fired: false,
            }),
        }
    }

    /// Returns the worker pool bound.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Returns true while a batch is executing.
    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Returns the number of jobs queued for the next batch.
    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Queues a job for the next batch.
    pub fn add_job<F>(
        &self,
        id: impl Into<String>,
        method: impl Into<String>,
        func: F,
        result_store: Option<ResultStore<T>>,
    ) -> Result<(), ExecutorError>
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
    {
        let job = Job {
            id: id.into(),
            method: method.into(),
            func: Box::new(func),
            result_store,
        };
        let mut state = self.state.lock();
        if state.fired {
            return Err(ExecutorError::InUse);
        }
        debug!("executor: queued job {} ({})", job.id, job.method);
        state.jobs.push(job);
        Ok(())
    }

    /// Runs every queued job and waits until all of them have finished.
    ///
    /// Returns the completed job records in the order the jobs were added.
    /// A failing or panicking job only affects its own record.
    pub async fn fire(&self) -> Result<Vec<CompletedJob<T>>, ExecutorError>
    where
        T: Clone,
    {
        let jobs = {
            let mut state = self.state.lock();
            if state.fired {
                return Err(ExecutorError::InUse);
            }
            state.fired = true;
            std::mem::take(&mut state.jobs)
        };
        let _guard = FiredGuard { state: &self.state };

        debug!(
            "executor: firing {} jobs on {} workers",
            jobs.len(),
            self.max_workers
        );

        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|_| ExecutorError::PoolClosed)?;
            let Job {
                id,
                method,
                func,
                result_store,
            } = job;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                func()
            });
            handles.push((id, method, result_store, handle));
        }

        let mut completed = Vec::with_capacity(handles.len());
        for (id, method, result_store, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    warn!("executor: job {} ({}) panicked", id, method);
                    Err(TaskError::panicked(&id))
                }
                Err(err) => Err(TaskError::internal(format!("job {} aborted: {}", id, err))),
            };
            if let Err(err) = &result {
                debug!("executor: job {} ({}) failed: {}", id, method, err);
            }
            if let Some(store) = result_store {
                store.insert(id.clone(), result.clone());
            }
            completed.push(CompletedJob { id, method, result });
        }

        Ok(completed)
    }
}

impl<T> Default for TaskExecutor<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_WORKERS)
    }
}

impl<T> fmt::Debug for TaskExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskExecutor")
            .field("max_workers", &self.max_workers)
            .field("queued", &state.jobs.len())
            .field("fired", &state.fired)
            .finish()
    }
}
