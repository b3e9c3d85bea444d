//! Durable job checkpoints.
//!
//! [`JobStore`] is the persistence contract used by the dispatcher. Writes are
//! compare-and-swap on a per-record revision: a checkpoint succeeds only when
//! the stored revision equals the job's (or the record is absent and the job's
//! revision is zero), so two writers can never silently overwrite each other.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::codec::JobCodec;
use crate::error::CoreError;
use crate::job::Job;
use crate::status::TaskStatus;
use crate::types::{DbId, JobGuid, Timestamp};

/// Default page size for job listings.
pub const DEFAULT_LIMIT: i64 = 50;

/// Maximum page size for job listings.
pub const MAX_LIMIT: i64 = 100;

/// An operator-supplied job reference: a GUID or a numeric row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRef {
    Guid(JobGuid),
    RowId(DbId),
}

impl FromStr for JobRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(guid) = s.parse::<uuid::Uuid>() {
            return Ok(Self::Guid(guid));
        }
        s.parse::<DbId>()
            .map(Self::RowId)
            .map_err(|_| CoreError::Validation(format!("'{s}' is neither a job GUID nor a row id")))
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guid(guid) => write!(f, "{guid}"),
            Self::RowId(id) => write!(f, "#{id}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobListQuery {
    pub status: Option<TaskStatus>,
    pub parent_guid: Option<JobGuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobListQuery {
    pub fn clamped_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Row-level view of a persisted job, without decoding its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: DbId,
    pub guid: JobGuid,
    pub parent_guid: Option<JobGuid>,
    pub kind: String,
    pub pipeline_id: Option<String>,
    pub active_task_id: Option<String>,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub error_count: i32,
    pub log_path: String,
    pub location: Option<String>,
    pub worker: Option<String>,
    pub revision: i64,
    pub updated_at: Timestamp,
}

impl JobSummary {
    /// Summary columns for `job` as it is about to be written.
    pub fn of(job: &Job, id: DbId, revision: i64) -> Self {
        Self {
            id,
            guid: job.guid,
            parent_guid: job.parent_guid,
            kind: job.spec.kind().to_string(),
            pipeline_id: job.pipeline_id.as_ref().map(ToString::to_string),
            active_task_id: job.active_task_id.as_ref().map(ToString::to_string),
            status: job.active_status,
            retry_count: job.active_task_retries as i32,
            error_count: job.error_count as i32,
            log_path: job.log_path.display().to_string(),
            location: job.active_location.clone(),
            worker: job.active_worker.clone(),
            revision,
            updated_at: chrono::Utc::now(),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write `job` if its revision matches the stored one, then bump
    /// `job.revision`. Returns the row id.
    async fn checkpoint(&self, job: &mut Job) -> Result<DbId, CoreError>;

    /// Rehydrate the latest checkpoint.
    async fn load(&self, guid: JobGuid) -> Result<Job, CoreError>;

    async fn resolve(&self, job_ref: JobRef) -> Result<JobGuid, CoreError>;

    async fn children(&self, parent: JobGuid) -> Result<Vec<Job>, CoreError>;

    async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, guid: JobGuid) -> Result<bool, CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct StoredJob {
    summary: JobSummary,
    payload: Value,
}

#[derive(Default)]
struct MemoryInner {
    next_id: DbId,
    records: HashMap<JobGuid, StoredJob>,
}

/// Process-local store. Used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryJobStore {
    codec: JobCodec,
    inner: Mutex<MemoryInner>,
}

impl MemoryJobStore {
    pub fn new(codec: JobCodec) -> Self {
        Self {
            codec,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn decode(&self, stored: &StoredJob) -> Result<Job, CoreError> {
        let mut job = self.codec.decode(stored.payload.clone())?;
        job.revision = stored.summary.revision;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn checkpoint(&self, job: &mut Job) -> Result<DbId, CoreError> {
        let payload = self.codec.encode(job)?;
        let mut inner = self.inner.lock().await;

        let existing = inner
            .records
            .get(&job.guid)
            .map(|stored| (stored.summary.id, stored.summary.revision));
        let id = match existing {
            Some((_, stored_revision)) if stored_revision != job.revision => {
                return Err(CoreError::Conflict(format!(
                    "Job {} was modified concurrently (stored revision {stored_revision}, expected {})",
                    job.guid, job.revision
                )));
            }
            Some((id, _)) => id,
            None if job.revision != 0 => {
                return Err(CoreError::Conflict(format!(
                    "Job {} was deleted concurrently",
                    job.guid
                )));
            }
            None => {
                inner.next_id += 1;
                inner.next_id
            }
        };

        let revision = job.revision + 1;
        inner.records.insert(
            job.guid,
            StoredJob {
                summary: JobSummary::of(job, id, revision),
                payload,
            },
        );
        job.revision = revision;
        Ok(id)
    }

    async fn load(&self, guid: JobGuid) -> Result<Job, CoreError> {
        let inner = self.inner.lock().await;
        let stored = inner
            .records
            .get(&guid)
            .ok_or_else(|| CoreError::not_found("job", guid))?;
        self.decode(stored)
    }

    async fn resolve(&self, job_ref: JobRef) -> Result<JobGuid, CoreError> {
        let inner = self.inner.lock().await;
        let found = match job_ref {
            JobRef::Guid(guid) => inner.records.contains_key(&guid).then_some(guid),
            JobRef::RowId(id) => inner
                .records
                .values()
                .find(|r| r.summary.id == id)
                .map(|r| r.summary.guid),
        };
        found.ok_or_else(|| CoreError::not_found("job", job_ref))
    }

    async fn children(&self, parent: JobGuid) -> Result<Vec<Job>, CoreError> {
        let inner = self.inner.lock().await;
        let mut stored: Vec<&StoredJob> = inner
            .records
            .values()
            .filter(|r| r.summary.parent_guid == Some(parent))
            .collect();
        stored.sort_by_key(|r| r.summary.id);
        stored.into_iter().map(|r| self.decode(r)).collect()
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<JobSummary>, CoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<JobSummary> = inner
            .records
            .values()
            .map(|r| &r.summary)
            .filter(|s| query.status.map_or(true, |status| s.status == status))
            .filter(|s| query.parent_guid.map_or(true, |p| s.parent_guid == Some(p)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.clamped_limit() as usize)
            .collect())
    }

    async fn delete(&self, guid: JobGuid) -> Result<bool, CoreError> {
        Ok(self.inner.lock().await.records.remove(&guid).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_helpers::test_job;

    #[tokio::test]
    async fn checkpoint_then_load_round_trips() {
        let store = MemoryJobStore::default();
        let mut job = test_job();
        let id = store.checkpoint(&mut job).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(job.revision, 1);

        let loaded = store.load(job.guid).await.unwrap();
        assert_eq!(loaded.guid, job.guid);
        assert_eq!(loaded.revision, 1);
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let store = MemoryJobStore::default();
        let mut job = test_job();
        store.checkpoint(&mut job).await.unwrap();

        let mut stale = store.load(job.guid).await.unwrap();
        job.error_count = 1;
        store.checkpoint(&mut job).await.unwrap();

        stale.error_count = 5;
        assert_matches!(store.checkpoint(&mut stale).await, Err(CoreError::Conflict(_)));
        assert_eq!(store.load(job.guid).await.unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn write_after_delete_is_a_conflict() {
        let store = MemoryJobStore::default();
        let mut job = test_job();
        store.checkpoint(&mut job).await.unwrap();
        assert!(store.delete(job.guid).await.unwrap());
        assert!(!store.delete(job.guid).await.unwrap());
        assert_matches!(store.checkpoint(&mut job).await, Err(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolve_by_guid_or_row_id() {
        let store = MemoryJobStore::default();
        let mut first = test_job();
        let mut second = test_job();
        store.checkpoint(&mut first).await.unwrap();
        store.checkpoint(&mut second).await.unwrap();

        assert_eq!(store.resolve(JobRef::RowId(2)).await.unwrap(), second.guid);
        assert_eq!(store.resolve(JobRef::Guid(first.guid)).await.unwrap(), first.guid);
        assert_matches!(store.resolve(JobRef::RowId(9)).await, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_and_pages_newest_first() {
        let store = MemoryJobStore::default();
        for i in 0..5 {
            let mut job = test_job();
            if i % 2 == 0 {
                job.fail_configuration("bad");
            }
            store.checkpoint(&mut job).await.unwrap();
        }

        let errors = store
            .list(&JobListQuery {
                status: Some(TaskStatus::Error),
                ..JobListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(errors.iter().map(|s| s.id).collect::<Vec<_>>(), vec![5, 3, 1]);

        let page = store
            .list(&JobListQuery {
                limit: Some(2),
                offset: Some(1),
                ..JobListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.iter().map(|s| s.id).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[tokio::test]
    async fn children_are_found_by_parent() {
        let store = MemoryJobStore::default();
        let mut parent = test_job();
        parent.activate(crate::test_helpers::t("a"), TaskStatus::Waiting);
        let mut children = parent.split();
        store.checkpoint(&mut parent).await.unwrap();
        for child in &mut children {
            store.checkpoint(child).await.unwrap();
        }
        let loaded = store.children(parent.guid).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].parent_guid, Some(parent.guid));
    }

    #[test]
    fn job_ref_parses_guid_or_row_id() {
        let guid = uuid::Uuid::new_v4();
        assert_eq!(guid.to_string().parse::<JobRef>().unwrap(), JobRef::Guid(guid));
        assert_eq!(" 42 ".parse::<JobRef>().unwrap(), JobRef::RowId(42));
        assert_matches!("nope".parse::<JobRef>(), Err(CoreError::Validation(_)));
    }
}
