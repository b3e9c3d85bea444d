//! Status of a job's active task.
//!
//! Each variant's discriminant is the `status_id` persisted in the job
//! record table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Waiting = 1,
    Running = 2,
    Complete = 3,
    Error = 4,
    Cancelling = 5,
    Cancelled = 6,
    WaitingForFiles = 7,
    SplitWaiting = 8,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        Self::Waiting,
        Self::Running,
        Self::Complete,
        Self::Error,
        Self::Cancelling,
        Self::Cancelled,
        Self::WaitingForFiles,
        Self::SplitWaiting,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::WaitingForFiles => "waitingForFiles",
            Self::SplitWaiting => "splitWaiting",
        }
    }

    /// Active jobs occupy a queue slot or a runner.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Running | Self::Cancelling)
    }

    /// No further transitions happen without operator intervention.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

impl From<TaskStatus> for StatusId {
    fn from(value: TaskStatus) -> Self {
        value as StatusId
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::Validation(format!("Unknown task status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_waiting_running_cancelling_are_active() {
        let active: Vec<_> = TaskStatus::ALL.into_iter().filter(|s| s.is_active()).collect();
        assert_eq!(
            active,
            vec![TaskStatus::Waiting, TaskStatus::Running, TaskStatus::Cancelling]
        );
    }

    #[test]
    fn split_waiting_is_neither_active_nor_terminal() {
        assert!(!TaskStatus::SplitWaiting.is_active());
        assert!(!TaskStatus::SplitWaiting.is_terminal());
        assert!(!TaskStatus::WaitingForFiles.is_active());
    }

    #[test]
    fn ids_round_trip() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(TaskStatus::from_id(0), None);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("splitwaiting".parse::<TaskStatus>().unwrap(), TaskStatus::SplitWaiting);
        assert_eq!("ERROR".parse::<TaskStatus>().unwrap(), TaskStatus::Error);
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&TaskStatus::WaitingForFiles).unwrap();
        assert_eq!(json, "\"waitingForFiles\"");
    }
}
