//! Row model for the `pipeline_jobs` table.

use serde::Serialize;
use sqlx::FromRow;
use taskline_core::error::CoreError;
use taskline_core::status::{StatusId, TaskStatus};
use taskline_core::store::JobSummary;
use taskline_core::types::{DbId, JobGuid, Timestamp};

/// A row from the `pipeline_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PipelineJobRow {
    pub id: DbId,
    pub guid: JobGuid,
    pub parent_guid: Option<JobGuid>,
    pub kind: String,
    pub pipeline_id: Option<String>,
    pub active_task_id: Option<String>,
    pub status_id: StatusId,
    pub retry_count: i32,
    pub error_count: i32,
    pub log_path: String,
    pub location: Option<String>,
    pub worker: Option<String>,
    pub revision: i64,
    /// `{ "kind", "job", "spec" }` as produced by the job codec.
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PipelineJobRow {
    pub fn status(&self) -> Result<TaskStatus, CoreError> {
        TaskStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Job {} has unknown status id {}",
                self.guid, self.status_id
            ))
        })
    }

    pub fn to_summary(&self) -> Result<JobSummary, CoreError> {
        Ok(JobSummary {
            id: self.id,
            guid: self.guid,
            parent_guid: self.parent_guid,
            kind: self.kind.clone(),
            pipeline_id: self.pipeline_id.clone(),
            active_task_id: self.active_task_id.clone(),
            status: self.status()?,
            retry_count: self.retry_count,
            error_count: self.error_count,
            log_path: self.log_path.clone(),
            location: self.location.clone(),
            worker: self.worker.clone(),
            revision: self.revision,
            updated_at: self.updated_at,
        })
    }
}

/// Column values written on every checkpoint.
#[derive(Debug, Clone)]
pub struct WritePipelineJob {
    pub guid: JobGuid,
    pub parent_guid: Option<JobGuid>,
    pub kind: String,
    pub pipeline_id: Option<String>,
    pub active_task_id: Option<String>,
    pub status_id: StatusId,
    pub retry_count: i32,
    pub error_count: i32,
    pub log_path: String,
    pub location: Option<String>,
    pub worker: Option<String>,
    pub payload: serde_json::Value,
}

impl WritePipelineJob {
    pub fn new(summary: JobSummary, payload: serde_json::Value) -> Self {
        Self {
            guid: summary.guid,
            parent_guid: summary.parent_guid,
            kind: summary.kind,
            pipeline_id: summary.pipeline_id,
            active_task_id: summary.active_task_id,
            status_id: summary.status.id(),
            retry_count: summary.retry_count,
            error_count: summary.error_count,
            log_path: summary.log_path,
            location: summary.location,
            worker: summary.worker,
            payload,
        }
    }
}
