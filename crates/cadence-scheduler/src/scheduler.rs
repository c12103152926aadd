//! Scheduler orchestration and state machine.
//!
//! The scheduler runs as a single event loop fed by a command channel:
//! caller requests (schedule, cancel) and asynchronous events (timer fires,
//! execution outcomes) all flow through one `mpsc` receiver, so at most one
//! state transition is in flight for any job id at any instant. Timer
//! callbacks send fire events back into the same channel; executor outcomes
//! enter through [`SchedulerHandle::on_success`] / [`on_error`].
//!
//! Every handler reloads the persisted record and re-checks its status
//! before mutating, so stale timer fires, duplicate outcomes, and cancels
//! racing an in-flight execution all degrade to benign no-ops.
//!
//! [`on_error`]: SchedulerHandle::on_error

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    ExecutionOutcome, Job, JobExecutionResponse, JobExecutor, JobKind, JobRepository, JobStatus,
    RetryPolicy, ScheduledJob, SchedulerError, TimerCallback, TimerEngine, TimerHandle,
};

/// Buffer size for the command channel between handles and the event loop.
const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was live and is now canceled.
    Canceled,
    /// The job had already reached a terminal status; nothing was done.
    /// Cancellation is idempotent, so this is not an error.
    AlreadyTerminal,
}

/// Commands processed by the scheduler event loop.
enum SchedulerCommand {
    Schedule {
        job: Job,
        respond: oneshot::Sender<Result<(), SchedulerError>>,
    },
    SchedulePeriodic {
        job: Job,
        respond: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Cancel {
        job_id: String,
        respond: oneshot::Sender<Result<CancelOutcome, SchedulerError>>,
    },
    TimerFired {
        job_id: String,
    },
    Outcome {
        response: JobExecutionResponse,
    },
    Shutdown {
        respond: oneshot::Sender<()>,
    },
}

/// Clonable handle for submitting work to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Schedule a one-shot job.
    ///
    /// The delay is `max(0, expiration_time − now)`: a job whose expiration
    /// is already in the past fires on the next tick rather than being
    /// rejected. Errors from the timer engine or the repository surface here
    /// synchronously, and no partial job record is left behind.
    pub async fn schedule(&self, job: Job) -> Result<(), SchedulerError> {
        self.request(|respond| SchedulerCommand::Schedule { job, respond })
            .await?
    }

    /// Schedule an interval job.
    ///
    /// The first firing is armed at `expiration_time`; each subsequent
    /// firing is re-armed only after the previous one's outcome has been
    /// fully applied, so concurrent fires for one id cannot occur.
    pub async fn schedule_periodic(&self, job: Job) -> Result<(), SchedulerError> {
        self.request(|respond| SchedulerCommand::SchedulePeriodic { job, respond })
            .await?
    }

    /// Cancel a job.
    ///
    /// Idempotent: canceling an already-terminal job returns
    /// [`CancelOutcome::AlreadyTerminal`] without touching the timer engine.
    pub async fn cancel(&self, job_id: impl Into<String>) -> Result<CancelOutcome, SchedulerError> {
        let job_id = job_id.into();
        self.request(|respond| SchedulerCommand::Cancel { job_id, respond })
            .await?
    }

    /// Notify the scheduler that the timer for `job_id` fired.
    ///
    /// Normally invoked by the timer callbacks the scheduler arms itself;
    /// exposed so alternative timer transports can feed fires in. Stale or
    /// duplicate fires are benign no-ops.
    pub async fn on_timer_fired(&self, job_id: impl Into<String>) -> Result<(), SchedulerError> {
        self.notify(SchedulerCommand::TimerFired {
            job_id: job_id.into(),
        })
        .await
    }

    /// Deliver a successful execution outcome.
    pub async fn on_success(&self, response: JobExecutionResponse) -> Result<(), SchedulerError> {
        self.notify(SchedulerCommand::Outcome { response }).await
    }

    /// Deliver a failed execution outcome.
    pub async fn on_error(&self, response: JobExecutionResponse) -> Result<(), SchedulerError> {
        self.notify(SchedulerCommand::Outcome { response }).await
    }

    /// Stop the event loop after draining commands already submitted.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(SchedulerCommand::Shutdown { respond })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, SchedulerError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    async fn notify(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SchedulerError::ChannelClosed)
    }
}

/// The scheduling engine.
///
/// Owns the collaborators and the retry policy; all state transitions happen
/// inside its event loop.
pub struct Scheduler {
    timer: Arc<dyn TimerEngine>,
    executor: Arc<dyn JobExecutor>,
    repository: Arc<dyn JobRepository>,
    policy: RetryPolicy,
    tx: mpsc::Sender<SchedulerCommand>,
    rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Start a scheduler on the current runtime.
    ///
    /// Returns a clonable handle plus the join handle of the event loop task.
    pub fn spawn(
        timer: Arc<dyn TimerEngine>,
        executor: Arc<dyn JobExecutor>,
        repository: Arc<dyn JobRepository>,
        policy: RetryPolicy,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let scheduler = Self {
            timer,
            executor,
            repository,
            policy,
            tx: tx.clone(),
            rx,
        };
        let join = tokio::spawn(scheduler.run());
        (SchedulerHandle { tx }, join)
    }

    /// Run the event loop until a shutdown command arrives.
    async fn run(mut self) {
        info!("scheduler starting");

        while let Some(command) = self.rx.recv().await {
            match command {
                SchedulerCommand::Schedule { job, respond } => {
                    let result = self.handle_schedule(job, false).await;
                    let _ = respond.send(result);
                }
                SchedulerCommand::SchedulePeriodic { job, respond } => {
                    let result = self.handle_schedule(job, true).await;
                    let _ = respond.send(result);
                }
                SchedulerCommand::Cancel { job_id, respond } => {
                    let result = self.handle_cancel(&job_id).await;
                    let _ = respond.send(result);
                }
                SchedulerCommand::TimerFired { job_id } => {
                    if let Err(e) = self.handle_timer_fired(&job_id).await {
                        error!(job_id = %job_id, error = %e, "failed to apply timer fire");
                    }
                }
                SchedulerCommand::Outcome { response } => {
                    if let Err(e) = self.handle_outcome(&response).await {
                        error!(
                            job_id = %response.job_id,
                            outcome = ?response.outcome,
                            error = %e,
                            "failed to apply execution outcome"
                        );
                    }
                }
                SchedulerCommand::Shutdown { respond } => {
                    let _ = respond.send(());
                    break;
                }
            }
        }

        info!("scheduler shut down");
    }

    /// Admit a new job: validate, arm the first timer, persist.
    ///
    /// The timer is armed before the record is written; if the write fails
    /// the timer is canceled again, so either both exist or neither does.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle_schedule(&self, mut job: Job, periodic: bool) -> Result<(), SchedulerError> {
        match (&job.kind, periodic) {
            (JobKind::Exact, false) | (JobKind::Interval { .. }, true) => {}
            (JobKind::Exact, true) => {
                return Err(SchedulerError::InvalidConfig(
                    "periodic scheduling requires an interval job".to_string(),
                ));
            }
            (JobKind::Interval { .. }, false) => {
                return Err(SchedulerError::InvalidConfig(
                    "interval jobs must be scheduled periodically".to_string(),
                ));
            }
        }
        if let JobKind::Interval {
            every_ms,
            remaining_repeats,
        } = &job.kind
        {
            if *every_ms == 0 {
                return Err(SchedulerError::InvalidConfig(
                    "interval job must have a non-zero interval".to_string(),
                ));
            }
            if *remaining_repeats == Some(0) {
                return Err(SchedulerError::InvalidConfig(
                    "interval job with a repeat bound of zero would never fire".to_string(),
                ));
            }
        }

        if self.repository.get(&job.id).await?.is_some() {
            return Err(SchedulerError::JobExists(job.id));
        }

        let delay = job.due_delay(Utc::now());
        job.status = JobStatus::Scheduled;
        job.retry_count = 0;

        let handle = self.arm_fire(delay, job.id.clone()).await?;
        let scheduled = ScheduledJob::new(job, handle);

        if let Err(e) = self.repository.save(scheduled.job()).await {
            // Undo the armed timer so no half-created job is left behind.
            self.timer.cancel(scheduled.handle()).await;
            return Err(e.into());
        }

        info!(
            delay_ms = delay.as_millis() as u64,
            periodic, "job scheduled"
        );
        Ok(())
    }

    /// Apply a timer fire: reload, guard, mark executing, start the work.
    #[tracing::instrument(skip(self))]
    async fn handle_timer_fired(&self, job_id: &str) -> Result<(), SchedulerError> {
        // Never trust in-memory state: the record may have been canceled or
        // removed since the timer was armed.
        let Some(mut job) = self.repository.get(job_id).await? else {
            debug!("timer fired for unknown job, ignoring");
            return Ok(());
        };
        if job.status != JobStatus::Scheduled {
            debug!(status = ?job.status, "timer fired for non-scheduled job, ignoring");
            return Ok(());
        }

        job.status = JobStatus::Executing;
        self.repository.update(&job).await?;

        debug!("execution starting");
        if let Err(e) = self.executor.execute(job.clone()).await {
            // The work never started; route it through the normal error path.
            warn!(error = %e, "executor refused job, treating as failed attempt");
            return self
                .apply_error(job, JobExecutionResponse::error(job_id, e.to_string()))
                .await;
        }

        Ok(())
    }

    /// Apply an execution outcome after re-checking the persisted status.
    #[tracing::instrument(skip(self, response), fields(job_id = %response.job_id, outcome = ?response.outcome))]
    async fn handle_outcome(&self, response: &JobExecutionResponse) -> Result<(), SchedulerError> {
        let Some(job) = self.repository.get(&response.job_id).await? else {
            debug!("outcome for unknown job, ignoring");
            return Ok(());
        };
        if job.status != JobStatus::Executing {
            // A cancel (or duplicate outcome) won the race; do not resurrect.
            debug!(status = ?job.status, "outcome for non-executing job, ignoring");
            return Ok(());
        }

        match response.outcome {
            ExecutionOutcome::Success => self.apply_success(job).await,
            ExecutionOutcome::Error => self.apply_error(job, response.clone()).await,
        }
    }

    /// Success path: complete the job, or re-arm an interval job with
    /// remaining repeats at `expiration_time + interval`.
    async fn apply_success(&self, mut job: Job) -> Result<(), SchedulerError> {
        job.retry_count = 0;

        match job.kind.clone() {
            JobKind::Exact => {
                job.scheduled_handle = None;
                job.status = JobStatus::Executed;
                self.repository.update(&job).await?;
                info!(job_id = %job.id, "job executed");
            }
            JobKind::Interval {
                every_ms,
                remaining_repeats,
            } => {
                let remaining = remaining_repeats.map(|r| r.saturating_sub(1));
                job.kind = JobKind::Interval {
                    every_ms,
                    remaining_repeats: remaining,
                };

                if remaining == Some(0) {
                    job.scheduled_handle = None;
                    job.status = JobStatus::Executed;
                    self.repository.update(&job).await?;
                    info!(job_id = %job.id, "interval job exhausted its repeats, executed");
                } else {
                    // Next window is anchored to the previous expiration, not
                    // to when the outcome happened to arrive.
                    job.expiration_time += chrono::Duration::milliseconds(every_ms as i64);
                    let delay = job.due_delay(Utc::now());

                    let handle = self.arm_fire(delay, job.id.clone()).await?;
                    let scheduled = ScheduledJob::new(job, handle);
                    let mut job = scheduled.into_job();
                    job.status = JobStatus::Scheduled;
                    if let Err(e) = self.repository.update(&job).await {
                        self.timer.cancel(handle).await;
                        return Err(e.into());
                    }
                    debug!(
                        job_id = %job.id,
                        delay_ms = delay.as_millis() as u64,
                        remaining = ?remaining,
                        "interval job re-armed"
                    );
                }
            }
        }

        Ok(())
    }

    /// Error path: reschedule with backoff while the policy permits,
    /// otherwise record the terminal failure.
    async fn apply_error(
        &self,
        mut job: Job,
        response: JobExecutionResponse,
    ) -> Result<(), SchedulerError> {
        if self.policy.permits(job.retry_count) {
            let delay = self.policy.next_delay(job.retry_count);

            // Persist the retry decision before re-arming so a crash between
            // the two steps cannot lose the attempt count.
            job.status = JobStatus::Retry;
            job.scheduled_handle = None;
            job.retry_count += 1;
            self.repository.update(&job).await?;

            let handle = self.arm_fire(delay, job.id.clone()).await?;
            let scheduled = ScheduledJob::new(job, handle);
            let mut job = scheduled.into_job();
            job.status = JobStatus::Scheduled;
            if let Err(e) = self.repository.update(&job).await {
                self.timer.cancel(handle).await;
                return Err(e.into());
            }

            warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %response.message,
                "execution failed, retry scheduled"
            );
        } else {
            job.scheduled_handle = None;
            job.status = JobStatus::Error {
                message: response.message.clone(),
            };
            self.repository.update(&job).await?;
            error!(
                job_id = %job.id,
                retry_count = job.retry_count,
                error = %response.message,
                "execution failed, retries exhausted"
            );
        }

        Ok(())
    }

    /// Cancel a job. Already-terminal jobs are left untouched and the timer
    /// engine is not called for them.
    #[tracing::instrument(skip(self))]
    async fn handle_cancel(&self, job_id: &str) -> Result<CancelOutcome, SchedulerError> {
        let Some(mut job) = self.repository.get(job_id).await? else {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        };

        if job.status.is_terminal() {
            debug!(status = ?job.status, "cancel of terminal job is a no-op");
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        if let Some(handle) = job.scheduled_handle.take() {
            // Best-effort: the timer may have fired moments ago, in which
            // case the in-flight fire will see the canceled status and stop.
            let was_pending = self.timer.cancel(handle).await;
            debug!(was_pending, "timer cancel requested");
        }

        job.status = JobStatus::Canceled;
        self.repository.update(&job).await?;
        info!("job canceled");
        Ok(CancelOutcome::Canceled)
    }

    /// Arm a one-shot timer whose firing feeds back into the event loop.
    async fn arm_fire(
        &self,
        delay: std::time::Duration,
        job_id: String,
    ) -> Result<TimerHandle, crate::TimerError> {
        let tx = self.tx.clone();
        let callback: TimerCallback = Box::new(move || {
            let tx = tx.clone();
            let job_id = job_id.clone();
            Box::pin(async move {
                if tx
                    .send(SchedulerCommand::TimerFired { job_id })
                    .await
                    .is_err()
                {
                    debug!("scheduler gone, dropping timer fire");
                }
            })
        });
        self.timer.arm(delay, callback).await
    }
}
