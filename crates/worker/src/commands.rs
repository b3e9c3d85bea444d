//! Subcommand handlers. Each returns the process exit code.

use std::process::ExitCode;

use taskline_core::error::CoreError;
use taskline_core::job::Job;
use taskline_core::job_kind::{FileAnalysisSpec, GenericSpec, JobSpec};
use taskline_core::status::TaskStatus;
use taskline_core::store::{JobListQuery, JobRef};
use taskline_core::task_id::TaskId;

use crate::bootstrap::Worker;
use crate::cli::Command;

pub async fn execute(command: Command, worker: Worker) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run => run(worker).await,
        Command::Submit {
            pipeline,
            inputs,
            root,
            protocol,
            split,
            params,
        } => {
            let pipeline_id = TaskId::parse(&pipeline)?;
            let spec: Box<dyn JobSpec> = match protocol {
                Some(name) => Box::new(FileAnalysisSpec::new(name, split)),
                None if split => Box::new(FileAnalysisSpec::new(pipeline_id.display_name(), true)),
                None => Box::new(GenericSpec::default()),
            };
            let mut job = Job::new(spec, Some(pipeline_id), root).with_inputs(inputs);
            for (key, value) in params {
                job = job.with_parameter(key, value);
            }
            submit(worker, job).await
        }
        Command::List {
            status,
            limit,
            offset,
        } => {
            let query = JobListQuery {
                status,
                limit: Some(limit),
                offset: Some(offset),
                ..Default::default()
            };
            let jobs = worker.dispatcher.list(&query).await?;
            for job in &jobs {
                println!(
                    "{:>6}  {}  {:<15}  {:<40}  retries={} errors={}",
                    job.id,
                    job.guid,
                    job.status.as_str(),
                    job.active_task_id.as_deref().unwrap_or("-"),
                    job.retry_count,
                    job.error_count
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Cancel { id } => Ok(report_affected("Cancelled", id, worker.dispatcher.cancel(id).await)),
        Command::Retry { id } => Ok(report_affected("Retried", id, worker.dispatcher.retry(id).await)),
    }
}

async fn run(worker: Worker) -> anyhow::Result<ExitCode> {
    let resumed = worker.dispatcher.recover().await?;
    let handles = worker.start();
    tracing::info!(resumed, worker = %worker.config.worker_name, "Worker running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    worker.stop(handles).await;
    Ok(ExitCode::SUCCESS)
}

async fn submit(worker: Worker, job: Job) -> anyhow::Result<ExitCode> {
    let guid = job.guid;
    tracing::info!(job_guid = %guid, description = %job.description(), "Submitting job");
    let handles = worker.start();
    if let Err(e) = worker.dispatcher.enqueue(job).await {
        eprintln!("{guid}: {e}");
        worker.stop(handles).await;
        return Ok(ExitCode::FAILURE);
    }
    let code = wait_until_settled(&worker, guid).await?;
    worker.stop(handles).await;
    Ok(code)
}

/// Poll until the job is complete, cancelled, or stays in `error`, or the
/// user interrupts.
async fn wait_until_settled(worker: &Worker, guid: taskline_core::types::JobGuid) -> anyhow::Result<ExitCode> {
    let store = &worker.dispatcher.services().store;
    let mut last_error_revision = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(job_guid = %guid, "Interrupted, job stays checkpointed");
                return Ok(ExitCode::FAILURE);
            }
            _ = tokio::time::sleep(worker.config.poll_interval) => {}
        }

        let job = store.load(guid).await?;
        let settled = match job.active_status {
            TaskStatus::Complete => job.active_task_id.is_none(),
            TaskStatus::Cancelled => true,
            // An error may still be followed by an automatic retry.
            TaskStatus::Error => {
                let stable = last_error_revision == Some(job.revision);
                last_error_revision = Some(job.revision);
                stable
            }
            _ => false,
        };
        if settled {
            println!(
                "{guid}  {}  errors={}  log={}",
                job.active_status,
                job.error_count,
                job.log_path.display()
            );
            return Ok(if job.active_status == TaskStatus::Complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
    }
}

fn report_affected(verb: &str, id: JobRef, result: Result<bool, CoreError>) -> ExitCode {
    match result {
        Ok(true) => {
            println!("{verb} {id}");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("Job {id} is not in a state that allows this");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
