//! Repository for the `pipeline_jobs` table.
//!
//! Updates are compare-and-swap on `revision`: they return `None` when the
//! stored revision no longer matches the caller's.

use sqlx::PgPool;
use taskline_core::status::StatusId;
use taskline_core::types::{DbId, JobGuid};

use crate::models::pipeline_job::{PipelineJobRow, WritePipelineJob};

/// Column list for `pipeline_jobs` queries.
const COLUMNS: &str = "\
    id, guid, parent_guid, kind, pipeline_id, active_task_id, status_id, \
    retry_count, error_count, log_path, location, worker, revision, payload, \
    created_at, updated_at";

pub struct PipelineJobRepo;

impl PipelineJobRepo {
    /// Insert the first checkpoint of a job at revision 1.
    ///
    /// Returns `None` when a record with the same GUID already exists.
    pub async fn insert(
        pool: &PgPool,
        input: &WritePipelineJob,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO pipeline_jobs \
                 (guid, parent_guid, kind, pipeline_id, active_task_id, status_id, \
                  retry_count, error_count, log_path, location, worker, revision, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1, $12) \
             ON CONFLICT (guid) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(input.guid)
            .bind(input.parent_guid)
            .bind(&input.kind)
            .bind(&input.pipeline_id)
            .bind(&input.active_task_id)
            .bind(input.status_id)
            .bind(input.retry_count)
            .bind(input.error_count)
            .bind(&input.log_path)
            .bind(&input.location)
            .bind(&input.worker)
            .bind(&input.payload)
            .fetch_optional(pool)
            .await
    }

    /// Overwrite a record if its revision still equals `expected_revision`,
    /// incrementing the revision.
    pub async fn update_cas(
        pool: &PgPool,
        input: &WritePipelineJob,
        expected_revision: i64,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE pipeline_jobs SET \
                 parent_guid = $2, kind = $3, pipeline_id = $4, active_task_id = $5, \
                 status_id = $6, retry_count = $7, error_count = $8, log_path = $9, \
                 location = $10, worker = $11, payload = $12, \
                 revision = revision + 1, updated_at = NOW() \
             WHERE guid = $1 AND revision = $13 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(input.guid)
            .bind(input.parent_guid)
            .bind(&input.kind)
            .bind(&input.pipeline_id)
            .bind(&input.active_task_id)
            .bind(input.status_id)
            .bind(input.retry_count)
            .bind(input.error_count)
            .bind(&input.log_path)
            .bind(&input.location)
            .bind(&input.worker)
            .bind(&input.payload)
            .bind(expected_revision)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_guid(
        pool: &PgPool,
        guid: JobGuid,
    ) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM pipeline_jobs WHERE guid = $1");
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(guid)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<PipelineJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM pipeline_jobs WHERE id = $1");
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Split children of `parent`, in creation order.
    pub async fn list_children(
        pool: &PgPool,
        parent: JobGuid,
    ) -> Result<Vec<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM pipeline_jobs \
             WHERE parent_guid = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(parent)
            .fetch_all(pool)
            .await
    }

    /// Newest first, with optional status and parent filters.
    pub async fn list(
        pool: &PgPool,
        status_id: Option<StatusId>,
        parent_guid: Option<JobGuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PipelineJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM pipeline_jobs \
             WHERE ($1::SMALLINT IS NULL OR status_id = $1) \
               AND ($2::UUID IS NULL OR parent_guid = $2) \
             ORDER BY id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, PipelineJobRow>(&query)
            .bind(status_id)
            .bind(parent_guid)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, guid: JobGuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM pipeline_jobs WHERE guid = $1")
            .bind(guid)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
