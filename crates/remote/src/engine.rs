//! The contract every remote execution engine adapter satisfies.

use async_trait::async_trait;
use taskline_core::job::Job;

use crate::error::RemoteError;
use crate::path_mapper::PathMapper;

/// Remote-side status of a submitted job.
#[derive(Debug, Clone)]
pub enum RemoteStatus {
    Queued,
    Running,
    /// Finished. Carries the updated job, already translated back to
    /// controller paths, when the engine returned one.
    Complete { job: Option<Job> },
    Error { message: String },
    Cancelled,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Submit, query and cancel work on an external compute resource.
///
/// Adapters translate every path embedded in the job through their
/// [`PathMapper`] before it leaves the controller, and back again when a
/// job is returned.
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    fn name(&self) -> &str;

    fn path_mapper(&self) -> &dyn PathMapper;

    /// Submit the job's active task. Returns the engine-assigned id.
    async fn submit(&self, job: &Job) -> Result<String, RemoteError>;

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, RemoteError>;

    async fn cancel(&self, remote_id: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RemoteStatus::Queued.is_terminal());
        assert!(!RemoteStatus::Running.is_terminal());
        assert!(RemoteStatus::Complete { job: None }.is_terminal());
        assert!(RemoteStatus::Cancelled.is_terminal());
        assert!(RemoteStatus::Error { message: "x".into() }.is_terminal());
    }
}
