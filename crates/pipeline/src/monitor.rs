//! Background monitoring: remote engine polling, input re-checks and
//! startup recovery.

use std::sync::Arc;
use std::time::Duration;

use taskline_core::driver::Advance;
use taskline_core::error::CoreError;
use taskline_core::factory::LOCAL_LOCATION;
use taskline_core::status::TaskStatus;
use taskline_remote::RemoteStatus;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::location::LocationKind;
use crate::outcome::TaskOutcome;
use crate::retry::with_retry;

impl Dispatcher {
    /// Poll remote engines and re-check jobs waiting for files every
    /// `interval` until `cancel` fires.
    pub async fn run_monitor(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Job monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_remote_once().await {
                        tracing::error!(error = %e, "Remote poll cycle failed");
                    }
                    if let Err(e) = self.recheck_waiting_for_files().await {
                        tracing::error!(error = %e, "Input re-check cycle failed");
                    }
                }
            }
        }
    }

    /// Poll every outstanding remote task once. Returns how many reached a
    /// terminal status.
    pub async fn poll_remote_once(&self) -> Result<usize, CoreError> {
        let mut finished = 0;
        for summary in self.list_all(TaskStatus::Running).await? {
            let Some(location) = summary.location.as_deref() else {
                continue;
            };
            let Ok(LocationKind::Engine(engine)) =
                self.services.locations.get(location).map(|l| l.kind.clone())
            else {
                continue;
            };
            let job = self.services.store.load(summary.guid).await?;
            let Some(remote_id) = job.remote_id.clone() else {
                continue;
            };

            let polled = {
                let (engine, remote_id) = (&engine, remote_id.as_str());
                with_retry(&self.services.retry, "remote poll", move || async move {
                    engine.poll(remote_id).await.map_err(CoreError::from)
                })
                .await
            };
            let status = match polled {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(job_guid = %job.guid, remote_id = %remote_id, error = %e, "Remote poll failed");
                    continue;
                }
            };
            tracing::debug!(job_guid = %job.guid, remote_id = %remote_id, status = status.as_str(), "Polled remote task");

            let outcome = match status {
                RemoteStatus::Queued | RemoteStatus::Running => continue,
                RemoteStatus::Complete { job: returned } => TaskOutcome::Succeeded {
                    actions: returned
                        .map(|r| r.actions.iter().cloned().collect())
                        .unwrap_or_default(),
                },
                RemoteStatus::Error { message } => TaskOutcome::Failed { message },
                RemoteStatus::Cancelled => TaskOutcome::Cancelled { actions: Vec::new() },
            };
            finished += 1;
            let guid = job.guid;
            if let Err(e) = self.finish_task(job, outcome).await {
                tracing::error!(job_guid = %guid, error = %e, "Failed to record remote outcome");
            }
        }
        Ok(finished)
    }

    /// Drive every job in `waitingForFiles`; those whose inputs appeared
    /// move on.
    pub async fn recheck_waiting_for_files(&self) -> Result<usize, CoreError> {
        let mut resumed = 0;
        for summary in self.list_all(TaskStatus::WaitingForFiles).await? {
            let job = self.services.store.load(summary.guid).await?;
            match self.drive(job).await {
                Ok(step) if !matches!(step, Advance::WaitingForFiles { .. }) => {
                    resumed += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::error!(job_guid = %summary.guid, error = %e, "Input re-check failed"),
            }
        }
        Ok(resumed)
    }

    /// Re-queue work that was in progress when the process stopped. Returns
    /// the number of jobs resumed.
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let mut resumed = 0;

        for summary in self.list_all(TaskStatus::Waiting).await? {
            if self.is_tracked(summary.guid).await {
                continue;
            }
            let job = self.services.store.load(summary.guid).await?;
            match self.drive(job).await {
                Ok(_) => resumed += 1,
                Err(e) => tracing::error!(job_guid = %summary.guid, error = %e, "Failed to resume job"),
            }
        }

        // Local tasks that were running died with the previous process.
        for summary in self.list_all(TaskStatus::Running).await? {
            let local = summary.location.as_deref().map_or(true, |l| l == LOCAL_LOCATION);
            if !local || self.is_tracked(summary.guid).await {
                continue;
            }
            let mut job = self.services.store.load(summary.guid).await?;
            let from = job.set_status(TaskStatus::Waiting);
            job.active_worker = None;
            self.checkpoint(&mut job).await?;
            self.publish_transition(&job, from);
            match self.drive(job).await {
                Ok(_) => resumed += 1,
                Err(e) => tracing::error!(job_guid = %summary.guid, error = %e, "Failed to resume job"),
            }
        }

        // A cancel requested before the crash ends here.
        for summary in self.list_all(TaskStatus::Cancelling).await? {
            let local = summary.location.as_deref().map_or(true, |l| l == LOCAL_LOCATION);
            if !local || self.is_tracked(summary.guid).await {
                continue;
            }
            let job = self.services.store.load(summary.guid).await?;
            self.mark_cancelled(job).await?;
        }

        for summary in self.list_all(TaskStatus::SplitWaiting).await? {
            match summary.parent_guid {
                None => self.try_join(summary.guid).await?,
                Some(parent_guid) => {
                    // The parent may have joined just before the process died.
                    if self.services.store.load(parent_guid).await?.joined {
                        let child = self.services.store.load(summary.guid).await?;
                        self.complete_joined_children(&mut [child]).await?;
                    }
                }
            }
        }

        tracing::info!(resumed, "Recovered jobs from checkpoints");
        Ok(resumed)
    }
}
