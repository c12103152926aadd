//! Error types for the scheduling engine.

use thiserror::Error;

/// Errors reported by a [`TimerEngine`](crate::TimerEngine).
#[derive(Debug, Error)]
pub enum TimerError {
    /// The engine could not arm a timer.
    #[error("failed to arm timer: {0}")]
    ArmFailed(String),

    /// The engine is shutting down and no longer accepts timers.
    #[error("timer engine unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a [`JobRepository`](crate::JobRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store could not be reached.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be read or written.
    #[error("repository storage error: {0}")]
    Storage(String),
}

/// Errors reported by a [`JobExecutor`](crate::JobExecutor) when it cannot
/// even begin a job's work. Failures *during* the work are reported later as
/// error outcomes instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor rejected or could not start the job.
    #[error("failed to start job execution: {0}")]
    StartFailed(String),
}

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Timer engine error.
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),

    /// Job repository error.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Job already exists.
    #[error("job already exists: {0}")]
    JobExists(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Invalid job or policy configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler has shut down and no longer accepts requests.
    #[error("scheduler channel closed")]
    ChannelClosed,
}
