//! Fan-out into split children and fan-in when they rejoin.

use std::collections::BTreeMap;
use std::path::Path;

use taskline_core::error::CoreError;
use taskline_core::job::Job;
use taskline_core::status::TaskStatus;
use taskline_core::task_id::TaskId;
use taskline_core::types::JobGuid;
use taskline_events::bus::event_types;
use taskline_events::JobEvent;

use crate::dispatcher::Dispatcher;

/// What a join check found to do.
enum JoinStep {
    Nothing,
    /// Children the store never received, rebuilt and persisted.
    Restored(Vec<Job>),
    Joined(Job),
}

impl Dispatcher {
    /// Split the parent, persist it and every child, then start the children.
    ///
    /// The parent is written first so the planned child GUIDs are durable;
    /// children lost before their own write are rebuilt by [`try_join`](Self::try_join).
    pub(crate) async fn split(&self, mut job: Job) -> Result<(), CoreError> {
        let from = job.active_status;
        let mut children = job.split();
        self.checkpoint(&mut job).await?;
        self.publish_transition(&job, from);

        for child in &mut children {
            self.checkpoint(child).await?;
        }
        let guids: Vec<String> = children.iter().map(|c| c.guid.to_string()).collect();
        tracing::info!(
            job_guid = %job.guid,
            task_id = ?job.active_task_id.as_ref().map(ToString::to_string),
            children = children.len(),
            "Job split"
        );
        job.log()
            .info(&format!("Split into {} children", children.len()))
            .await;
        self.services.events.publish(
            JobEvent::for_job(event_types::SPLIT, &job)
                .with_payload(serde_json::json!({ "children": guids })),
        );

        self.start_children(job.guid, children).await;
        Ok(())
    }

    async fn start_children(&self, parent_guid: JobGuid, children: Vec<Job>) {
        for child in children {
            let guid = child.guid;
            if let Err(e) = self.drive(child).await {
                tracing::error!(job_guid = %guid, parent_guid = %parent_guid, error = %e, "Failed to start split child");
            }
        }
    }

    /// Join the children of `parent_guid` if every one of them is ready.
    ///
    /// A child in `error` or `cancelled` blocks the join until it is retried.
    /// Recorded children missing from the store are rebuilt and started.
    pub(crate) async fn try_join(&self, parent_guid: JobGuid) -> Result<(), CoreError> {
        let step = {
            let _guard = self.join_lock.lock().await;
            self.join_step(parent_guid).await?
        };
        match step {
            JoinStep::Nothing => Ok(()),
            JoinStep::Restored(children) => {
                self.start_children(parent_guid, children).await;
                Ok(())
            }
            JoinStep::Joined(parent) => {
                if parent.active_status == TaskStatus::Waiting {
                    self.drive(parent).await?;
                }
                Ok(())
            }
        }
    }

    async fn join_step(&self, parent_guid: JobGuid) -> Result<JoinStep, CoreError> {
        let mut parent = self.services.store.load(parent_guid).await?;
        if parent.active_status != TaskStatus::SplitWaiting {
            return Ok(JoinStep::Nothing);
        }
        let mut children = self.services.store.children(parent_guid).await?;
        let missing: Vec<JobGuid> = parent
            .split_children
            .iter()
            .filter(|guid| !children.iter().any(|c| c.guid == **guid))
            .copied()
            .collect();
        if !missing.is_empty() {
            return self.restore_children(&parent, &missing).await.map(JoinStep::Restored);
        }
        if children.is_empty() {
            return Ok(JoinStep::Nothing);
        }
        if let Some(blocked) = children.iter().find(|c| !c.is_ready_to_join()) {
            if matches!(blocked.active_status, TaskStatus::Error | TaskStatus::Cancelled) {
                tracing::warn!(
                    job_guid = %parent.guid,
                    child_guid = %blocked.guid,
                    child_status = %blocked.active_status,
                    "Join blocked by a split child"
                );
                parent
                    .log()
                    .warn(&format!(
                        "Join blocked: child {} is {}",
                        blocked.guid, blocked.active_status
                    ))
                    .await;
            }
            return Ok(JoinStep::Nothing);
        }

        let join_task = self.join_task(&parent, &children)?;
        warn_on_overlapping_outputs(&parent, &children).await;
        for child in &children {
            parent.merge_joined_child(child);
        }

        // Parent first: once it is joined, the parked children are only
        // bookkeeping and a crash here leaves nothing to re-merge.
        let from = parent.active_status;
        parent.finish_join(join_task.clone());
        self.checkpoint(&mut parent).await?;
        self.publish_transition(&parent, from);
        self.complete_joined_children(&mut children).await?;

        self.services.events.publish(
            JobEvent::for_job(event_types::JOINED, &parent)
                .with_payload(serde_json::json!({ "children": children.len() })),
        );
        tracing::info!(
            job_guid = %parent.guid,
            children = children.len(),
            join_task = ?join_task.as_ref().map(ToString::to_string),
            error_count = parent.error_count,
            "Split children joined"
        );
        Ok(JoinStep::Joined(parent))
    }

    async fn restore_children(&self, parent: &Job, missing: &[JobGuid]) -> Result<Vec<Job>, CoreError> {
        let rebuilt = parent.rebuild_split_children().ok_or_else(|| {
            CoreError::Internal(format!(
                "Job {} no longer splits into its {} recorded children",
                parent.guid,
                parent.split_children.len()
            ))
        })?;
        let mut restored = Vec::with_capacity(missing.len());
        for mut child in rebuilt.into_iter().filter(|c| missing.contains(&c.guid)) {
            self.checkpoint(&mut child).await?;
            restored.push(child);
        }
        tracing::warn!(job_guid = %parent.guid, restored = restored.len(), "Restored unsaved split children");
        parent
            .log()
            .warn(&format!("Restored {} unsaved split children", restored.len()))
            .await;
        Ok(restored)
    }

    /// Close out children whose parent already merged them.
    pub(crate) async fn complete_joined_children(&self, children: &mut [Job]) -> Result<(), CoreError> {
        for child in children {
            if child.active_status == TaskStatus::Complete && child.active_task_id.is_none() {
                continue;
            }
            let from = child.active_status;
            child.mark_job_complete();
            self.checkpoint(child).await?;
            self.publish_transition(child, from);
        }
        Ok(())
    }

    /// The join task the children parked at, or `None` when they ran out of
    /// tasks. Children completed by an earlier, interrupted join fall back
    /// to the pipeline's progression.
    fn join_task(&self, parent: &Job, children: &[Job]) -> Result<Option<TaskId>, CoreError> {
        let Some(pipeline_id) = &parent.pipeline_id else {
            return Ok(None);
        };
        for child in children {
            if child.active_status != TaskStatus::SplitWaiting {
                continue;
            }
            let Some(active) = &child.active_task_id else {
                continue;
            };
            if child.is_task_complete(active) {
                continue;
            }
            if self.services.registry.lookup_in(pipeline_id, active)?.is_join() {
                return Ok(Some(active.clone()));
            }
        }
        if children.iter().any(|c| c.active_status == TaskStatus::SplitWaiting) {
            return Ok(None);
        }

        // No child is parked any more: take the first join task after the
        // split point that some child has not run.
        let pipeline = self.services.registry.pipeline(pipeline_id)?;
        let start = parent
            .active_task_id
            .as_ref()
            .and_then(|id| pipeline.index_of(id))
            .map_or(0, |index| index + 1);
        for id in pipeline.progression().iter().skip(start) {
            if children.iter().all(|c| c.is_task_complete(id)) {
                continue;
            }
            if self.services.registry.lookup_in(pipeline_id, id)?.is_join() {
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }
}

/// Different children producing the same output path is reported, never
/// resolved: both actions are kept.
async fn warn_on_overlapping_outputs(parent: &Job, children: &[Job]) {
    let inherited = parent.actions.output_paths();
    let mut producers: BTreeMap<&Path, JobGuid> = BTreeMap::new();
    for child in children {
        for path in child.actions.output_paths() {
            if inherited.contains(path) {
                continue;
            }
            match producers.get(path) {
                Some(other) if *other != child.guid => {
                    tracing::warn!(
                        job_guid = %parent.guid,
                        path = %path.display(),
                        first_child = %other,
                        second_child = %child.guid,
                        "Split children produced the same output"
                    );
                    parent
                        .log()
                        .warn(&format!(
                            "Output {} produced by both {} and {}",
                            path.display(),
                            other,
                            child.guid
                        ))
                        .await;
                }
                Some(_) => {}
                None => {
                    producers.insert(path, child.guid);
                }
            }
        }
    }
}
