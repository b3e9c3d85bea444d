/// Row ids of persisted job records are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Globally unique job identifier.
pub type JobGuid = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
