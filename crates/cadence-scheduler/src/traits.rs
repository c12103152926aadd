//! Collaborator contracts consumed by the scheduler.
//!
//! Implementations are injected at construction time as `Arc<dyn …>`; the
//! scheduler never looks collaborators up globally.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ExecutorError, Job, RepositoryError, TimerError, TimerHandle};

/// Callback invoked when a timer fires.
pub type TimerCallback =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Provider of one-shot and periodic delayed callbacks.
#[async_trait]
pub trait TimerEngine: Send + Sync {
    /// Schedule `on_fire` to run once after `delay`.
    ///
    /// The returned handle can be used for cancellation. Implementations
    /// must guarantee the callback is invoked at most once, even when a
    /// cancel races with the firing.
    async fn arm(&self, delay: Duration, on_fire: TimerCallback)
    -> Result<TimerHandle, TimerError>;

    /// Schedule `on_fire` to run every `interval` until canceled.
    async fn arm_periodic(
        &self,
        interval: Duration,
        on_fire: TimerCallback,
    ) -> Result<TimerHandle, TimerError>;

    /// Cancel a pending timer.
    ///
    /// Returns whether the timer was actually still pending, i.e. `false`
    /// if it had already fired or was already canceled.
    async fn cancel(&self, handle: TimerHandle) -> bool;
}

/// Performer of a job's actual work.
///
/// `execute` only *begins* the work and returns promptly; the outcome is
/// reported later as a [`JobExecutionResponse`](crate::JobExecutionResponse)
/// delivered to [`SchedulerHandle::on_success`](crate::SchedulerHandle::on_success)
/// / [`on_error`](crate::SchedulerHandle::on_error). This decoupling is what
/// keeps the scheduler non-blocking while work runs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Begin executing `job`. An `Err` means the work could not even be
    /// started; the scheduler routes it through the normal retry path.
    async fn execute(&self, job: Job) -> Result<(), ExecutorError>;
}

/// Durable CRUD for job records.
///
/// No multi-job transactional guarantees are required: the scheduler is the
/// single writer for any given job id.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Load a job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>, RepositoryError>;

    /// Persist a newly created job (full-state upsert).
    async fn save(&self, job: &Job) -> Result<(), RepositoryError>;

    /// Persist a state transition (full-state upsert).
    async fn update(&self, job: &Job) -> Result<(), RepositoryError>;

    /// Delete a terminal job record. Returns whether a record existed.
    async fn remove(&self, id: &str) -> Result<bool, RepositoryError>;
}
