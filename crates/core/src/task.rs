//! Executable task instances and the context they run in.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::action::RecordedAction;
use crate::error::CoreError;
use crate::job::Job;
use crate::job_log::JobLog;
use crate::workdir::{ExpectedOutput, WorkDirectory};

/// A single execution of one pipeline step for one job.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run to completion. Outputs are declared through the context and
    /// finalized by the caller after this returns.
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<(), CoreError>;
}

/// Everything a running task may touch.
pub struct TaskContext<'a> {
    pub job: &'a Job,
    pub work: &'a mut WorkDirectory,
    pub log: &'a JobLog,
    pub cancel: CancellationToken,
    pub action: RecordedAction,
    pub expected_outputs: Vec<ExpectedOutput>,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        job: &'a Job,
        work: &'a mut WorkDirectory,
        log: &'a JobLog,
        cancel: CancellationToken,
        action: RecordedAction,
    ) -> Self {
        Self {
            job,
            work,
            log,
            cancel,
            action,
            expected_outputs: Vec::new(),
        }
    }

    /// Cooperative cancellation point.
    pub fn check_cancelled(&self) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() || self.job.interrupted {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    /// Reserve a staged output that is moved to the job's analysis directory
    /// when the task succeeds.
    pub fn expect_output(&mut self, name: &str, role: &str) -> Result<PathBuf, CoreError> {
        let path = self.work.declare_output(name)?;
        self.expected_outputs.push(ExpectedOutput::new(name, role));
        Ok(path)
    }

    pub fn into_parts(self) -> (RecordedAction, Vec<ExpectedOutput>) {
        (self.action, self.expected_outputs)
    }
}
