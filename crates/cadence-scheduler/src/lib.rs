//! Durable retry-aware job scheduling engine for Cadence.
//!
//! This crate provides the scheduling core that:
//! - Runs a unit of work once at a future instant or repeatedly at a fixed interval
//! - Guarantees at most one concurrent execution per job id
//! - Reschedules failed executions with bounded exponential backoff
//! - Supports idempotent cancellation and crash-consistent state transitions
//!
//! Timers, execution, and persistence are external collaborators injected at
//! construction time behind the [`TimerEngine`], [`JobExecutor`], and
//! [`JobRepository`] traits. [`cadence-timer`] and [`cadence-store`] provide
//! ready-made implementations of the first and last.
//!
//! [`cadence-timer`]: https://docs.rs/cadence-timer
//! [`cadence-store`]: https://docs.rs/cadence-store

mod error;
mod retry;
mod scheduler;
mod traits;
mod types;

pub use error::{ExecutorError, RepositoryError, SchedulerError, TimerError};
pub use retry::RetryPolicy;
pub use scheduler::{CancelOutcome, Scheduler, SchedulerHandle};
pub use traits::{JobExecutor, JobRepository, TimerCallback, TimerEngine};
pub use types::{
    ExecutionOutcome, Job, JobExecutionResponse, JobKind, JobStatus, ScheduledJob, TimerHandle,
};
