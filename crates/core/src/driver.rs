//! The state-machine driver.
//!
//! [`advance`] looks at a job's pipeline, active task and status, moves the
//! active-task pointer, and tells the caller what has to happen next. It never
//! runs tasks or touches storage; the dispatcher acts on the returned
//! [`Advance`].

use crate::error::CoreError;
use crate::factory::TaskFactory;
use crate::job::Job;
use crate::pipeline::TaskPipeline;
use crate::registry::TaskRegistry;
use crate::status::TaskStatus;
use crate::task_id::TaskId;

/// Outcome of one driver step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// A task was activated in `waiting`; route it to `location`.
    Activated { task_id: TaskId, location: String },
    /// The active task is waiting for required inputs to appear.
    WaitingForFiles { task_id: TaskId },
    /// The job must be split before `task_id` runs.
    Split { task_id: TaskId },
    /// A split child reached its join point and is parked in `splitWaiting`.
    Join { join_task: Option<TaskId> },
    /// An automatic retry of the active task was granted.
    Retry { task_id: TaskId, attempt: u32 },
    Complete,
    /// Terminal error, no retry left.
    Error { task_id: Option<TaskId> },
    /// Nothing to do in the current status.
    Idle { status: TaskStatus },
}

/// Advance `job` by one step.
///
/// Configuration problems (unknown pipeline or factory, active task missing
/// from the progression) are returned as errors and leave the job untouched.
pub fn advance(job: &mut Job, registry: &TaskRegistry) -> Result<Advance, CoreError> {
    let Some(pipeline_id) = job.pipeline_id.clone() else {
        if job.active_status.is_terminal() {
            return Ok(Advance::Idle {
                status: job.active_status,
            });
        }
        job.mark_job_complete();
        return Ok(Advance::Complete);
    };
    let pipeline = registry.pipeline(&pipeline_id).map_err(|_| {
        CoreError::Configuration(format!("Job {} refers to unknown pipeline {pipeline_id}", job.guid))
    })?;

    match job.active_status {
        TaskStatus::Running
        | TaskStatus::Cancelling
        | TaskStatus::Cancelled
        | TaskStatus::SplitWaiting => Ok(Advance::Idle {
            status: job.active_status,
        }),
        TaskStatus::Error => evaluate_retry(job, registry, &pipeline),
        TaskStatus::WaitingForFiles => {
            let index = active_index(job, registry, &pipeline)?;
            let factory = registry.lookup_in(pipeline.id(), &pipeline.progression()[index])?;
            if factory.missing_inputs(job).is_empty() {
                job.set_status(TaskStatus::Waiting);
                job.active_location = Some(factory.location().to_string());
                Ok(Advance::Activated {
                    task_id: factory.active_id(),
                    location: factory.location().to_string(),
                })
            } else {
                Ok(Advance::WaitingForFiles {
                    task_id: factory.active_id(),
                })
            }
        }
        TaskStatus::Waiting => {
            let start = match job.active_task_id {
                None => 0,
                Some(_) => active_index(job, registry, &pipeline)?,
            };
            scan(job, registry, &pipeline, start)
        }
        TaskStatus::Complete => match job.active_task_id {
            None => Ok(Advance::Idle {
                status: TaskStatus::Complete,
            }),
            Some(_) => {
                let index = active_index(job, registry, &pipeline)?;
                scan(job, registry, &pipeline, index + 1)
            }
        },
    }
}

/// Position of the active task, by identity or by a factory's active id.
fn active_index(job: &Job, registry: &TaskRegistry, pipeline: &TaskPipeline) -> Result<usize, CoreError> {
    let inconsistent = || {
        CoreError::Configuration(format!(
            "Active task {} of job {} is not part of pipeline {}",
            job.active_task_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            job.guid,
            pipeline.id()
        ))
    };
    let active = job.active_task_id.as_ref().ok_or_else(inconsistent)?;
    if let Some(index) = pipeline.index_of(active) {
        return Ok(index);
    }
    for (index, id) in pipeline.progression().iter().enumerate() {
        if let Ok(factory) = registry.lookup_in(pipeline.id(), id) {
            if factory.matches_active(active) {
                return Ok(index);
            }
        }
    }
    Err(inconsistent())
}

fn scan(
    job: &mut Job,
    registry: &TaskRegistry,
    pipeline: &TaskPipeline,
    start: usize,
) -> Result<Advance, CoreError> {
    // Resolve every factory first so a configuration error leaves the job as-is.
    let factories = pipeline
        .progression()
        .iter()
        .skip(start)
        .map(|id| registry.lookup_in(pipeline.id(), id))
        .collect::<Result<Vec<TaskFactory>, CoreError>>()?;

    for factory in factories {
        if factory.is_join() && job.is_split_child() {
            job.await_join(Some(factory.active_id()));
            return Ok(Advance::Join {
                join_task: Some(factory.active_id()),
            });
        }
        if !factory.is_join() && job.is_splittable() {
            job.activate(factory.active_id(), TaskStatus::Waiting);
            return Ok(Advance::Split {
                task_id: factory.active_id(),
            });
        }
        if factory.is_participant(job)? && !factory.is_job_complete(job) {
            let task_id = factory.active_id();
            if !factory.missing_inputs(job).is_empty() {
                job.activate(task_id.clone(), TaskStatus::WaitingForFiles);
                return Ok(Advance::WaitingForFiles { task_id });
            }
            job.activate(task_id.clone(), TaskStatus::Waiting);
            job.active_location = Some(factory.location().to_string());
            return Ok(Advance::Activated {
                task_id,
                location: factory.location().to_string(),
            });
        }
    }

    if job.is_split_child() {
        job.await_join(None);
        return Ok(Advance::Join { join_task: None });
    }
    job.mark_job_complete();
    Ok(Advance::Complete)
}

fn evaluate_retry(
    job: &mut Job,
    registry: &TaskRegistry,
    pipeline: &TaskPipeline,
) -> Result<Advance, CoreError> {
    let Some(active) = job.active_task_id.clone() else {
        return Ok(Advance::Error { task_id: None });
    };
    let index = active_index(job, registry, pipeline)?;
    let factory = registry.lookup_in(pipeline.id(), &pipeline.progression()[index])?;

    let budget = factory.auto_retry();
    if budget > 0 && job.active_task_retries < budget && factory.is_auto_retry_enabled(job) {
        let attempt = job.prepare_retry();
        tracing::info!(
            job_guid = %job.guid,
            task_id = %active,
            attempt,
            budget,
            "Auto-retrying task"
        );
        return Ok(Advance::Retry {
            task_id: active,
            attempt,
        });
    }
    Ok(Advance::Error {
        task_id: Some(active),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
