//! Scheduler data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque identifier for an armed timer.
///
/// Minted by the [`TimerEngine`](crate::TimerEngine) and meaningful only to
/// it; the scheduler stores it on the job so a pending timer can be canceled
/// after a restart or a repository reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerHandle(pub u64);

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique id, assigned at creation, immutable.
    pub id: String,
    /// Whether this job fires once or repeatedly.
    pub kind: JobKind,
    /// The next instant at which the job is due to fire. Recomputed after
    /// each periodic firing.
    pub expiration_time: DateTime<Utc>,
    /// Current status of the job.
    pub status: JobStatus,
    /// Consecutive failed attempts since the job last succeeded or was
    /// (re)scheduled fresh. Reset to 0 on successful execution.
    pub retry_count: u32,
    /// Timer handle for the currently armed timer. `Some` exactly while
    /// status is `Scheduled` or `Executing`.
    pub scheduled_handle: Option<TimerHandle>,
    /// Timestamp of the last persisted mutation.
    pub last_updated: DateTime<Utc>,
}

/// Whether a job fires once or repeatedly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Fire once at `expiration_time`.
    Exact,
    /// Fire every `every_ms` milliseconds.
    Interval {
        /// Interval between firings, in milliseconds.
        every_ms: u64,
        /// Successful firings left before the job completes.
        /// `None` means unbounded.
        remaining_repeats: Option<u32>,
    },
}

/// Current status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// A timer is armed and the job is waiting to fire.
    Scheduled,
    /// The executor has been asked to perform the work; the outcome has not
    /// arrived yet.
    Executing,
    /// A failed execution is being rescheduled with backoff. Transient: the
    /// job moves on to `Scheduled` once the retry timer is armed.
    Retry,
    /// The job ran to completion (terminal).
    Executed,
    /// The job failed and retries are exhausted (terminal).
    Error {
        /// Message from the last failed execution.
        message: String,
    },
    /// The job was canceled before completing (terminal).
    Canceled,
}

impl JobStatus {
    /// Terminal statuses never re-enter the scheduling lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Executed | JobStatus::Error { .. } | JobStatus::Canceled
        )
    }
}

impl Job {
    /// Create a one-shot job due at `at`, with a fresh UUID id.
    pub fn exact(at: DateTime<Utc>) -> Self {
        Self::exact_with_id(uuid::Uuid::new_v4().to_string(), at)
    }

    /// Create a one-shot job with a caller-supplied id.
    pub fn exact_with_id(id: String, at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: JobKind::Exact,
            expiration_time: at,
            status: JobStatus::Scheduled,
            retry_count: 0,
            scheduled_handle: None,
            last_updated: Utc::now(),
        }
    }

    /// Create an interval job firing every `every_ms` milliseconds starting
    /// at `first_at`, bounded by `repeats` successful firings (`None` =
    /// unbounded), with a fresh UUID id.
    pub fn interval(first_at: DateTime<Utc>, every_ms: u64, repeats: Option<u32>) -> Self {
        Self::interval_with_id(uuid::Uuid::new_v4().to_string(), first_at, every_ms, repeats)
    }

    /// Create an interval job with a caller-supplied id.
    pub fn interval_with_id(
        id: String,
        first_at: DateTime<Utc>,
        every_ms: u64,
        repeats: Option<u32>,
    ) -> Self {
        Self {
            id,
            kind: JobKind::Interval {
                every_ms,
                remaining_repeats: repeats,
            },
            expiration_time: first_at,
            status: JobStatus::Scheduled,
            retry_count: 0,
            scheduled_handle: None,
            last_updated: Utc::now(),
        }
    }

    /// Delay from `now` until the job is due, clamped to zero.
    ///
    /// A job whose expiration is already in the past fires on the next tick
    /// rather than being rejected.
    pub fn due_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.expiration_time - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// The firing interval, if this is an interval job.
    pub fn interval_duration(&self) -> Option<chrono::Duration> {
        match &self.kind {
            JobKind::Exact => None,
            JobKind::Interval { every_ms, .. } => {
                Some(chrono::Duration::milliseconds(*every_ms as i64))
            }
        }
    }
}

/// A [`Job`] while its timer handle is live: the view the scheduler holds
/// between arming a timer and applying the firing's outcome.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    job: Job,
    handle: TimerHandle,
}

impl ScheduledJob {
    /// Bind a freshly armed timer to a job. Stamps the handle into the job
    /// so the persisted record and the in-memory view cannot disagree.
    pub fn new(mut job: Job, handle: TimerHandle) -> Self {
        job.scheduled_handle = Some(handle);
        Self { job, handle }
    }

    /// The underlying job.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The live timer handle.
    pub fn handle(&self) -> TimerHandle {
        self.handle
    }

    /// Lower back into a plain [`Job`], keeping the handle set.
    pub fn into_job(self) -> Job {
        self.job
    }
}

/// Outcome of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The work completed.
    Success,
    /// The work failed; the scheduler decides whether to retry.
    Error,
}

/// Outcome report delivered asynchronously by a
/// [`JobExecutor`](crate::JobExecutor) once the job's work finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionResponse {
    /// Id of the job the outcome belongs to.
    pub job_id: String,
    /// Whether the work succeeded or failed.
    pub outcome: ExecutionOutcome,
    /// Human-readable detail, e.g. the failure reason.
    pub message: String,
    /// When the outcome was produced.
    pub timestamp: DateTime<Utc>,
}

impl JobExecutionResponse {
    /// Build a success report for `job_id`.
    pub fn success(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            outcome: ExecutionOutcome::Success,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build an error report for `job_id`.
    pub fn error(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            outcome: ExecutionOutcome::Error,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
