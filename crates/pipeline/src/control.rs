//! Operator and remote-worker operations: cancel, retry, list, claim, report.

use futures::future::{BoxFuture, FutureExt};
use taskline_core::error::CoreError;
use taskline_core::factory::LOCAL_LOCATION;
use taskline_core::job::Job;
use taskline_core::status::TaskStatus;
use taskline_core::store::{JobListQuery, JobRef, JobSummary, MAX_LIMIT};
use taskline_core::types::JobGuid;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, InFlight};
use crate::location::LocationKind;
use crate::outcome::TaskOutcome;
use crate::retry::with_retry;

/// Attempts at cancelling when a concurrent writer wins the checkpoint race.
const CANCEL_ATTEMPTS: usize = 3;

impl Dispatcher {
    /// Cancel a job. Returns `false` when it was already terminal.
    ///
    /// Queued jobs are removed and cancelled at once. A running task is
    /// interrupted and checkpointed as `cancelling`; whoever finishes it
    /// records `cancelled`. Split parents cancel all of their children.
    pub async fn cancel(&self, job_ref: JobRef) -> Result<bool, CoreError> {
        let guid = self.services.store.resolve(job_ref).await?;
        self.cancel_guid(guid).await
    }

    fn cancel_guid(&self, guid: JobGuid) -> BoxFuture<'_, Result<bool, CoreError>> {
        async move {
            let mut attempt = 1;
            loop {
                match self.try_cancel(guid).await {
                    Err(CoreError::Conflict(reason)) if attempt < CANCEL_ATTEMPTS => {
                        tracing::debug!(job_guid = %guid, reason = %reason, "Cancel raced with another writer");
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        }
        .boxed()
    }

    async fn try_cancel(&self, guid: JobGuid) -> Result<bool, CoreError> {
        let mut job = self.services.store.load(guid).await?;
        if job.active_status.is_terminal() {
            return Ok(false);
        }

        if job.active_status == TaskStatus::SplitWaiting {
            for child in job.split_children.clone() {
                self.cancel_guid(child).await?;
            }
            job = self.services.store.load(guid).await?;
            if job.active_status.is_terminal() {
                return Ok(true);
            }
            self.mark_cancelled(job).await?;
            return Ok(true);
        }

        let running_here = {
            let in_flight = self.in_flight.lock().await;
            in_flight.get(&guid).map(|f| (f.location.clone(), f.cancel.clone()))
        };
        if let Some((location, token)) = running_here {
            if location == LOCAL_LOCATION {
                token.cancel();
                tracing::info!(job_guid = %guid, "Interrupting running task");
            }
            // The runner or the polling worker's report finishes the
            // cancellation.
            job.interrupt();
            let from = job.set_status(TaskStatus::Cancelling);
            if let Err(err) = self.checkpoint(&mut job).await {
                // A local runner may have recorded the cancellation first.
                let settled = matches!(err, CoreError::Conflict(_))
                    && self.services.store.load(guid).await?.active_status == TaskStatus::Cancelled;
                return if settled { Ok(true) } else { Err(err) };
            }
            self.publish_transition(&job, from);
            return Ok(true);
        }

        if let Some(remote_id) = job.remote_id.clone() {
            if let Some(location) = job.active_location.as_deref() {
                if let Ok(LocationKind::Engine(engine)) =
                    self.services.locations.get(location).map(|l| l.kind.clone())
                {
                    let (engine, remote_id) = (&engine, remote_id.as_str());
                    with_retry(&self.services.retry, "remote cancel", move || async move {
                        engine.cancel(remote_id).await.map_err(CoreError::from)
                    })
                    .await?;
                }
            }
        }

        if self.local.remove(guid).await || self.polling.remove(guid).await {
            tracing::debug!(job_guid = %guid, "Removed queued job");
        }
        self.mark_cancelled(job).await?;
        Ok(true)
    }

    pub(crate) async fn mark_cancelled(&self, mut job: Job) -> Result<(), CoreError> {
        job.interrupt();
        let from = job.set_status(TaskStatus::Cancelled);
        self.checkpoint(&mut job).await?;
        self.publish_transition(&job, from);
        job.log().warn("Job cancelled").await;
        tracing::info!(job_guid = %job.guid, from = %from, "Job cancelled");
        Ok(())
    }

    /// Operator retry of a job in `error` or `cancelled`: the active task
    /// gets a fresh retry budget and the checkpoint is re-enqueued. Returns
    /// `false` when the job is in any other state.
    pub async fn retry(&self, job_ref: JobRef) -> Result<bool, CoreError> {
        let guid = self.services.store.resolve(job_ref).await?;
        self.retry_guid(guid).await
    }

    fn retry_guid(&self, guid: JobGuid) -> BoxFuture<'_, Result<bool, CoreError>> {
        async move {
            let mut job = self.services.store.load(guid).await?;
            if !matches!(job.active_status, TaskStatus::Error | TaskStatus::Cancelled)
                || self.in_flight.lock().await.contains_key(&guid)
            {
                return Ok(false);
            }

            if Self::has_unjoined_children(&job) {
                // The parent waits again; its failed children are retried.
                let from = job.set_status(TaskStatus::SplitWaiting);
                job.interrupted = false;
                job.last_error = None;
                self.checkpoint(&mut job).await?;
                self.publish_transition(&job, from);
                for child in job.split_children.clone() {
                    self.retry_guid(child).await?;
                }
                self.try_join(guid).await?;
                return Ok(true);
            }

            let from = job.active_status;
            job.reset_for_retry();
            self.checkpoint(&mut job).await?;
            self.publish_transition(&job, from);
            job.log().info("Retry requested").await;
            tracing::info!(job_guid = %guid, from = %from, "Retrying job");
            self.enqueue_with(job, true).await?;
            Ok(true)
        }
        .boxed()
    }

    /// A split parent whose children were never merged back.
    fn has_unjoined_children(job: &Job) -> bool {
        !job.split_children.is_empty() && !job.joined
    }

    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError> {
        self.services.store.list(query).await
    }

    /// Every persisted job in `status`.
    pub(crate) async fn list_all(&self, status: TaskStatus) -> Result<Vec<JobSummary>, CoreError> {
        let mut all = Vec::new();
        loop {
            let page = self
                .services
                .store
                .list(&JobListQuery {
                    status: Some(status),
                    limit: Some(MAX_LIMIT),
                    offset: Some(all.len() as i64),
                    ..Default::default()
                })
                .await?;
            let done = (page.len() as i64) < MAX_LIMIT;
            all.extend(page);
            if done {
                return Ok(all);
            }
        }
    }

    /// Hand the oldest queued job of a polling location to `worker`.
    pub async fn claim(&self, location: &str, worker: &str) -> Result<Option<Job>, CoreError> {
        let kind = self.services.locations.get(location)?.kind.clone();
        if !matches!(kind, LocationKind::Polling) {
            return Err(CoreError::Validation(format!(
                "Location '{location}' is not a polling location"
            )));
        }

        while let Some(guid) = self.polling.pop(location).await {
            let mut job = self.services.store.load(guid).await?;
            if job.active_status != TaskStatus::Waiting {
                continue;
            }
            let from = job.set_status(TaskStatus::Running);
            job.active_worker = Some(worker.to_string());
            self.checkpoint(&mut job).await?;
            self.in_flight.lock().await.insert(
                guid,
                InFlight {
                    worker: worker.to_string(),
                    location: location.to_string(),
                    cancel: CancellationToken::new(),
                },
            );
            self.publish_transition(&job, from);
            tracing::info!(job_guid = %guid, location, worker, "Job claimed");
            return Ok(Some(job));
        }
        Ok(None)
    }

    /// Accept the result of a claimed task and drive the job on.
    pub async fn report(&self, guid: JobGuid, worker: &str, outcome: TaskOutcome) -> Result<(), CoreError> {
        let job = self.services.store.load(guid).await?;
        if !matches!(job.active_status, TaskStatus::Running | TaskStatus::Cancelling) {
            return Err(CoreError::Conflict(format!(
                "Job {guid} is {} and has no task to report",
                job.active_status
            )));
        }
        if job.active_worker.as_deref() != Some(worker) {
            return Err(CoreError::Conflict(format!(
                "Job {guid} is not claimed by worker '{worker}'"
            )));
        }
        self.in_flight.lock().await.remove(&guid);

        let outcome = if job.interrupted {
            outcome.into_cancelled()
        } else {
            outcome
        };
        tracing::info!(job_guid = %guid, worker, outcome = outcome.as_str(), "Task reported");
        self.finish_task(job, outcome).await
    }
}
