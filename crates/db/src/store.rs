//! [`JobStore`] backed by the `pipeline_jobs` table.

use async_trait::async_trait;
use taskline_core::codec::JobCodec;
use taskline_core::error::CoreError;
use taskline_core::job::Job;
use taskline_core::store::{JobListQuery, JobRef, JobStore, JobSummary};
use taskline_core::types::{DbId, JobGuid};

use crate::models::pipeline_job::{PipelineJobRow, WritePipelineJob};
use crate::repositories::PipelineJobRepo;
use crate::DbPool;

pub struct PgJobStore {
    pool: DbPool,
    codec: JobCodec,
}

impl PgJobStore {
    pub fn new(pool: DbPool, codec: JobCodec) -> Self {
        Self { pool, codec }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn decode(&self, row: PipelineJobRow) -> Result<Job, CoreError> {
        let revision = row.revision;
        let mut job = self.codec.decode(row.payload)?;
        job.revision = revision;
        Ok(job)
    }
}

fn db_error(err: sqlx::Error) -> CoreError {
    CoreError::Infrastructure(format!("Database error: {err}"))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn checkpoint(&self, job: &mut Job) -> Result<DbId, CoreError> {
        let payload = self.codec.encode(job)?;
        let input = WritePipelineJob::new(JobSummary::of(job, 0, job.revision + 1), payload);

        let written = if job.revision == 0 {
            PipelineJobRepo::insert(&self.pool, &input).await.map_err(db_error)?
        } else {
            PipelineJobRepo::update_cas(&self.pool, &input, job.revision)
                .await
                .map_err(db_error)?
        };

        let row = written.ok_or_else(|| {
            CoreError::Conflict(format!(
                "Job {} was modified concurrently (expected revision {})",
                job.guid, job.revision
            ))
        })?;
        tracing::trace!(job_guid = %job.guid, revision = row.revision, "Checkpointed job");
        job.revision = row.revision;
        Ok(row.id)
    }

    async fn load(&self, guid: JobGuid) -> Result<Job, CoreError> {
        let row = PipelineJobRepo::find_by_guid(&self.pool, guid)
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::not_found("job", guid))?;
        self.decode(row)
    }

    async fn resolve(&self, job_ref: JobRef) -> Result<JobGuid, CoreError> {
        let row = match job_ref {
            JobRef::Guid(guid) => PipelineJobRepo::find_by_guid(&self.pool, guid).await,
            JobRef::RowId(id) => PipelineJobRepo::find_by_id(&self.pool, id).await,
        }
        .map_err(db_error)?;
        row.map(|r| r.guid)
            .ok_or_else(|| CoreError::not_found("job", job_ref))
    }

    async fn children(&self, parent: JobGuid) -> Result<Vec<Job>, CoreError> {
        PipelineJobRepo::list_children(&self.pool, parent)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(|row| self.decode(row))
            .collect()
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError> {
        PipelineJobRepo::list(
            &self.pool,
            query.status.map(|s| s.id()),
            query.parent_guid,
            query.clamped_limit(),
            query.offset(),
        )
        .await
        .map_err(db_error)?
        .iter()
        .map(PipelineJobRow::to_summary)
        .collect()
    }

    async fn delete(&self, guid: JobGuid) -> Result<bool, CoreError> {
        PipelineJobRepo::delete(&self.pool, guid).await.map_err(db_error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use taskline_core::job_kind::FileAnalysisSpec;
    use taskline_core::status::TaskStatus;
    use taskline_core::task_id::TaskId;

    use super::*;

    #[test]
    fn write_columns_follow_the_job() {
        let mut job = Job::new(
            Box::new(FileAnalysisSpec::new("search", true)),
            Some(TaskId::pipeline("ms2", "default")),
            "/data",
        );
        job.activate(TaskId::task("ms2", "convert"), TaskStatus::Running);
        job.error_count = 2;

        let input = WritePipelineJob::new(JobSummary::of(&job, 0, 1), serde_json::Value::Null);
        assert_eq!(input.guid, job.guid);
        assert_eq!(input.kind, "fileAnalysis");
        assert_eq!(input.pipeline_id.as_deref(), Some("ms2:pipeline:default"));
        assert_eq!(input.active_task_id.as_deref(), Some("ms2:task:convert"));
        assert_eq!(input.status_id, TaskStatus::Running.id());
        assert_eq!(input.error_count, 2);
    }

    #[test]
    fn database_errors_are_retryable() {
        assert!(db_error(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
