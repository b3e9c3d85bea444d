//! Local task execution.
//!
//! Each runner loop pops GUIDs from the local queue, rehydrates the job from
//! its checkpoint, runs the active task in a fresh work directory and feeds
//! the outcome back into the driver.

use std::sync::Arc;

use taskline_core::action::RecordedAction;
use taskline_core::error::CoreError;
use taskline_core::factory::LOCAL_LOCATION;
use taskline_core::job::Job;
use taskline_core::status::TaskStatus;
use taskline_core::task::TaskContext;
use taskline_core::types::JobGuid;
use taskline_events::bus::event_types;
use taskline_events::JobEvent;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, InFlight};
use crate::outcome::TaskOutcome;

impl Dispatcher {
    /// Run one local runner loop until `cancel` fires.
    pub async fn run_local_worker(self: Arc<Self>, worker: String, cancel: CancellationToken) {
        tracing::info!(worker = %worker, "Local runner started");
        while let Some(guid) = self.local.pop(&cancel).await {
            if let Err(e) = self.execute_local(guid, &worker).await {
                tracing::error!(job_guid = %guid, worker = %worker, error = %e, "Local execution failed");
            }
        }
        tracing::info!(worker = %worker, "Local runner shutting down");
    }

    /// Execute the active task of a queued job.
    pub async fn execute_local(&self, guid: JobGuid, worker: &str) -> Result<(), CoreError> {
        let mut job = self.services.store.load(guid).await?;
        if job.active_status != TaskStatus::Waiting {
            tracing::debug!(job_guid = %guid, status = %job.active_status, "Skipping dequeued job");
            return Ok(());
        }
        if job.interrupted {
            let from = job.set_status(TaskStatus::Cancelled);
            self.checkpoint(&mut job).await?;
            self.publish_transition(&job, from);
            return Ok(());
        }

        let token = CancellationToken::new();
        self.in_flight.lock().await.insert(
            guid,
            InFlight {
                worker: worker.to_string(),
                location: LOCAL_LOCATION.to_string(),
                cancel: token.clone(),
            },
        );

        let from = job.set_status(TaskStatus::Running);
        job.active_worker = Some(worker.to_string());
        if let Err(e) = self.checkpoint(&mut job).await {
            self.in_flight.lock().await.remove(&guid);
            if let CoreError::Conflict(_) = e {
                let latest = self.services.store.load(guid).await?;
                if Self::cancel_requested(&latest) {
                    return self
                        .finish_task(latest, TaskOutcome::Cancelled { actions: Vec::new() })
                        .await;
                }
            }
            return Err(e);
        }
        self.publish_transition(&job, from);

        let result = self.run_task(&job, token.clone()).await;
        self.in_flight.lock().await.remove(&guid);

        let mut outcome = TaskOutcome::from_result(result);
        if token.is_cancelled() {
            job.interrupt();
            outcome = outcome.into_cancelled();
        }
        self.finish_task(job, outcome).await
    }

    async fn run_task(&self, job: &Job, cancel: CancellationToken) -> Result<Vec<RecordedAction>, CoreError> {
        let factory = self.active_factory(job)?;
        let task_id = factory.active_id();
        let task = factory.create_task(job)?;
        let log = job.log();
        let mut work = self
            .services
            .workdirs
            .allocate(job.guid, &task_id, factory.is_large_work())
            .await?;

        tracing::info!(
            job_guid = %job.guid,
            task_id = %task_id,
            work_dir = %work.path().display(),
            "Running task"
        );
        log.info(&format!("Running {task_id}")).await;

        let action = RecordedAction::start(task_id.clone(), task_id.display_name());
        let mut ctx = TaskContext::new(job, &mut work, &log, cancel, action);
        let result = task.run(&mut ctx).await;
        let (mut action, expected) = ctx.into_parts();

        let succeeded = result.is_ok();
        let finalized = work
            .finalize(&expected, &job.root, &mut action, succeeded)
            .await;
        work.discard(succeeded).await;

        result?;
        finalized?;
        action.complete();
        Ok(vec![action])
    }

    /// Apply a task outcome, checkpoint, and let the driver move on.
    pub(crate) async fn finish_task(&self, job: Job, outcome: TaskOutcome) -> Result<(), CoreError> {
        let task = job
            .active_task_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        match &outcome {
            TaskOutcome::Succeeded { .. } => {
                tracing::info!(job_guid = %job.guid, task_id = %task, "Task succeeded");
                job.log().info(&format!("{task} succeeded")).await;
            }
            TaskOutcome::Failed { message } | TaskOutcome::Misconfigured { message } => {
                tracing::error!(
                    job_guid = %job.guid,
                    task_id = %task,
                    log_path = %job.log_path.display(),
                    outcome = outcome.as_str(),
                    error = %message,
                    "Task failed"
                );
                job.log().error(&format!("{task} failed: {message}")).await;
            }
            TaskOutcome::Cancelled { .. } => {
                tracing::info!(job_guid = %job.guid, task_id = %task, "Task cancelled");
                job.log().warn(&format!("{task} cancelled")).await;
            }
        }

        let misconfigured = matches!(outcome, TaskOutcome::Misconfigured { .. });
        let (job, from) = self.record_outcome(job, outcome).await?;
        self.publish_transition(&job, from);

        if misconfigured && job.active_status == TaskStatus::Error {
            self.services.events.publish(
                JobEvent::for_job(event_types::ERROR, &job)
                    .with_message(job.last_error.clone().unwrap_or_default()),
            );
            return Ok(());
        }
        if job.active_status == TaskStatus::Cancelled {
            return Ok(());
        }
        self.drive(job).await.map(|_| ())
    }

    /// Checkpoint `job` with `outcome` applied. An operator cancel that
    /// checkpointed `cancelling` while the task ran wins the race: the
    /// outcome is re-applied to that snapshot as a cancellation.
    async fn record_outcome(&self, job: Job, outcome: TaskOutcome) -> Result<(Job, TaskStatus), CoreError> {
        let mut next = job.clone();
        let from = outcome.clone().apply(&mut next);
        match self.checkpoint(&mut next).await {
            Ok(_) => Ok((next, from)),
            Err(CoreError::Conflict(reason)) => {
                let mut latest = self.services.store.load(job.guid).await?;
                if !Self::cancel_requested(&latest) {
                    return Err(CoreError::Conflict(reason));
                }
                tracing::debug!(job_guid = %job.guid, "Outcome superseded by a cancel request");
                let from = outcome.into_cancelled().apply(&mut latest);
                self.checkpoint(&mut latest).await?;
                Ok((latest, from))
            }
            Err(e) => Err(e),
        }
    }

    fn cancel_requested(job: &Job) -> bool {
        job.interrupted && job.active_status == TaskStatus::Cancelling
    }
}
