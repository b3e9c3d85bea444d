//! Job dispatch.
//!
//! The [`Dispatcher`] owns the queues and the in-flight table. It feeds jobs
//! through the state-machine driver, checkpoints after every transition, and
//! routes the active task to its execution location:
//!
//! - `local` jobs go onto the [`LocalQueue`] consumed by the runner loops,
//! - polling locations hold jobs until a remote worker claims them,
//! - engine locations submit through their [`RemoteEngine`] adapter.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use taskline_core::driver::{advance, Advance};
use taskline_core::error::CoreError;
use taskline_core::factory::TaskFactory;
use taskline_core::job::Job;
use taskline_core::status::TaskStatus;
use taskline_core::types::{DbId, JobGuid};
use taskline_events::bus::event_types;
use taskline_events::JobEvent;
use taskline_remote::RemoteEngine;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::location::{Location, LocationKind};
use crate::queue::{LocalQueue, PollingQueues};
use crate::retry::{with_retry, Backoff};
use crate::services::Services;

/// A task that is executing right now.
pub(crate) struct InFlight {
    pub worker: String,
    pub location: String,
    pub cancel: CancellationToken,
}

pub struct Dispatcher {
    pub(crate) services: Services,
    pub(crate) local: LocalQueue,
    pub(crate) polling: PollingQueues,
    pub(crate) in_flight: Mutex<HashMap<JobGuid, InFlight>>,
    pub(crate) join_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            local: LocalQueue::default(),
            polling: PollingQueues::default(),
            in_flight: Mutex::new(HashMap::new()),
            join_lock: Mutex::new(()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Advance `job` once and hand it to the location of its now-active
    /// task. Configuration errors surface here, before any task runs.
    pub async fn enqueue(&self, job: Job) -> Result<Advance, CoreError> {
        self.enqueue_with(job, false).await
    }

    /// Like [`enqueue`](Self::enqueue). Unless `allow_requeue` is set, a job
    /// that is already queued or running is rejected.
    pub async fn enqueue_with(&self, job: Job, allow_requeue: bool) -> Result<Advance, CoreError> {
        if !allow_requeue && self.is_tracked(job.guid).await {
            return Err(CoreError::Conflict(format!(
                "Job {} is already queued or running",
                job.guid
            )));
        }
        self.drive(job).await
    }

    /// Whether the job sits in a queue or has a task executing.
    pub async fn is_tracked(&self, guid: JobGuid) -> bool {
        self.in_flight.lock().await.contains_key(&guid)
            || self.local.contains(guid).await
            || self.polling.contains(guid).await
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    // -- driving -------------------------------------------------------------

    /// Run the driver until the job has to wait for something.
    pub(crate) fn drive(&self, job: Job) -> BoxFuture<'_, Result<Advance, CoreError>> {
        async move { self.drive_inner(job).await }.boxed()
    }

    async fn drive_inner(&self, mut job: Job) -> Result<Advance, CoreError> {
        loop {
            let from = job.active_status;
            let step = match advance(&mut job, &self.services.registry) {
                Ok(step) => step,
                Err(err) if err.is_configuration() => {
                    self.fail_configuration(job, &err).await?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            tracing::debug!(job_guid = %job.guid, step = ?step, "Advanced job");

            match &step {
                Advance::Activated { task_id, location } => {
                    let location = match self.services.locations.get(location) {
                        Ok(location) => location.clone(),
                        Err(err) => {
                            self.fail_configuration(job, &err).await?;
                            return Err(err);
                        }
                    };
                    job.submitted = true;
                    self.checkpoint(&mut job).await?;
                    self.publish_transition(&job, from);
                    tracing::info!(
                        job_guid = %job.guid,
                        task_id = %task_id,
                        location = %location.name,
                        "Task activated"
                    );
                    self.route(job, &location).await?;
                }
                Advance::WaitingForFiles { task_id } => {
                    if from != TaskStatus::WaitingForFiles {
                        self.checkpoint(&mut job).await?;
                        self.publish_transition(&job, from);
                        tracing::info!(job_guid = %job.guid, task_id = %task_id, "Waiting for input files");
                    }
                }
                Advance::Split { .. } => self.split(job).await?,
                Advance::Join { .. } => {
                    self.checkpoint(&mut job).await?;
                    self.publish_transition(&job, from);
                    if let Some(parent) = job.parent_guid {
                        self.try_join(parent).await?;
                    }
                }
                Advance::Retry { task_id, attempt } => {
                    // The incremented counter is durable before the task is requeued.
                    self.checkpoint(&mut job).await?;
                    self.services.events.publish(
                        JobEvent::for_job(event_types::RETRYING, &job)
                            .with_transition(from)
                            .with_message(format!("Auto-retry {attempt} of {task_id}")),
                    );
                    continue;
                }
                Advance::Complete => {
                    self.checkpoint(&mut job).await?;
                    self.publish_transition(&job, from);
                    tracing::info!(job_guid = %job.guid, error_count = job.error_count, "Job complete");
                }
                Advance::Error { task_id } => {
                    // The error itself was checkpointed by whoever recorded it.
                    let message = job
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "Task failed".to_string());
                    tracing::error!(
                        job_guid = %job.guid,
                        task_id = ?task_id.as_ref().map(ToString::to_string),
                        log_path = %job.log_path.display(),
                        error = %message,
                        "Job failed"
                    );
                    self.services.events.publish(
                        JobEvent::for_job(event_types::ERROR, &job).with_message(message),
                    );
                }
                Advance::Idle { .. } => {}
            }
            return Ok(step);
        }
    }

    async fn route(&self, job: Job, location: &Location) -> Result<(), CoreError> {
        match &location.kind {
            LocationKind::Local => self.local.push(job.guid).await,
            LocationKind::Polling => self.polling.push(&location.name, job.guid).await,
            LocationKind::Engine(engine) => self.submit_remote(job, Arc::clone(engine)).await?,
        }
        Ok(())
    }

    async fn submit_remote(&self, mut job: Job, engine: Arc<dyn RemoteEngine>) -> Result<(), CoreError> {
        let submitted = {
            let (engine, snapshot) = (&engine, &job);
            with_retry(&self.services.retry, "remote submit", move || async move {
                engine.submit(snapshot).await.map_err(CoreError::from)
            })
            .await
        };

        match submitted {
            Ok(remote_id) => {
                let from = job.set_status(TaskStatus::Running);
                job.active_worker = Some(engine.name().to_string());
                job.remote_id = Some(remote_id.clone());
                self.checkpoint(&mut job).await?;
                self.publish_transition(&job, from);
                tracing::info!(
                    job_guid = %job.guid,
                    engine = %engine.name(),
                    remote_id = %remote_id,
                    "Submitted task to remote engine"
                );
                Ok(())
            }
            Err(err) if err.is_configuration() => self.fail_configuration(job, &err).await,
            Err(err) => {
                let message = format!("Remote submission to {} failed: {err}", engine.name());
                tracing::error!(
                    job_guid = %job.guid,
                    log_path = %job.log_path.display(),
                    error = %err,
                    "Remote submission failed"
                );
                job.log().error(&message).await;
                let from = job.active_status;
                job.record_error(message);
                self.checkpoint(&mut job).await?;
                self.publish_transition(&job, from);
                self.drive(job).await.map(|_| ())
            }
        }
    }

    /// Terminal error without consuming a retry.
    pub(crate) async fn fail_configuration(&self, mut job: Job, err: &CoreError) -> Result<(), CoreError> {
        let from = job.active_status;
        let message = err.to_string();
        tracing::error!(
            job_guid = %job.guid,
            task_id = ?job.active_task_id.as_ref().map(ToString::to_string),
            log_path = %job.log_path.display(),
            error = %message,
            "Job configuration error"
        );
        job.log().error(&message).await;
        job.fail_configuration(message.clone());
        self.checkpoint(&mut job).await?;
        self.services.events.publish(
            JobEvent::for_job(event_types::ERROR, &job)
                .with_transition(from)
                .with_message(message),
        );
        Ok(())
    }

    // -- helpers -------------------------------------------------------------

    /// Compare-and-swap write with transparent retry of infrastructure
    /// failures. Once the attempts run out the job degrades into `error`.
    pub(crate) async fn checkpoint(&self, job: &mut Job) -> Result<DbId, CoreError> {
        let mut backoff = Backoff::new(&self.services.retry);
        loop {
            match self.services.store.checkpoint(job).await {
                Ok(id) => return Ok(id),
                Err(err) => {
                    if !backoff.retry_after("checkpoint", &err).await {
                        if err.is_retryable() {
                            self.record_checkpoint_failure(job, &err).await;
                        }
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Log the failure, then make one last attempt at persisting the job in
    /// `error`. When that fails too the stored snapshot is left for
    /// [`recover`](Self::recover).
    async fn record_checkpoint_failure(&self, job: &mut Job, err: &CoreError) {
        let message = format!("Checkpoint failed: {err}");
        tracing::error!(
            job_guid = %job.guid,
            task_id = ?job.active_task_id.as_ref().map(ToString::to_string),
            log_path = %job.log_path.display(),
            error = %err,
            "Checkpoint retries exhausted"
        );
        job.log().error(&message).await;

        let from = job.active_status;
        job.record_error(message.clone());
        match self.services.store.checkpoint(job).await {
            Ok(_) => self.publish_transition(job, from),
            Err(e) => {
                tracing::error!(job_guid = %job.guid, error = %e, "Failed to persist checkpoint error");
            }
        }
        self.services.events.publish(
            JobEvent::for_job(event_types::ERROR, job).with_message(message),
        );
    }

    pub(crate) fn publish_transition(&self, job: &Job, from: TaskStatus) {
        if from != job.active_status {
            self.services
                .events
                .publish(JobEvent::status_changed(job, from));
        }
    }

    /// Factory of the job's active task, also matching factories that
    /// report a different active id.
    pub(crate) fn active_factory(&self, job: &Job) -> Result<TaskFactory, CoreError> {
        let (Some(pipeline_id), Some(active)) = (&job.pipeline_id, &job.active_task_id) else {
            return Err(CoreError::Configuration(format!(
                "Job {} has no active pipeline task",
                job.guid
            )));
        };
        if let Ok(factory) = self.services.registry.lookup_in(pipeline_id, active) {
            return Ok(factory);
        }
        let pipeline = self.services.registry.pipeline(pipeline_id)?;
        pipeline
            .progression()
            .iter()
            .filter_map(|id| self.services.registry.lookup_in(pipeline_id, id).ok())
            .find(|factory| factory.matches_active(active))
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "No factory for active task {active} of job {}",
                    job.guid
                ))
            })
    }
}
