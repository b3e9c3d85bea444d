//! The result of one task execution, wherever it ran.

use serde::{Deserialize, Serialize};
use taskline_core::action::RecordedAction;
use taskline_core::error::CoreError;
use taskline_core::job::Job;
use taskline_core::status::TaskStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TaskOutcome {
    Succeeded {
        #[serde(default)]
        actions: Vec<RecordedAction>,
    },
    /// Counts against the job's error count and retry budget.
    Failed { message: String },
    /// Terminal without consuming a retry.
    Misconfigured { message: String },
    Cancelled {
        #[serde(default)]
        actions: Vec<RecordedAction>,
    },
}

impl TaskOutcome {
    /// Classify a local task result.
    pub fn from_result(result: Result<Vec<RecordedAction>, CoreError>) -> Self {
        match result {
            Ok(actions) => Self::Succeeded { actions },
            Err(CoreError::Cancelled) => Self::Cancelled { actions: Vec::new() },
            Err(CoreError::Configuration(message)) => Self::Misconfigured { message },
            Err(err) => Self::Failed {
                message: err.to_string(),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Misconfigured { .. } => "misconfigured",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// The outcome of a task that was interrupted: outputs already recorded
    /// are kept, anything else ends as a plain cancellation.
    pub fn into_cancelled(self) -> Self {
        match self {
            Self::Succeeded { actions } | Self::Cancelled { actions } => Self::Cancelled { actions },
            _ => Self::Cancelled { actions: Vec::new() },
        }
    }

    /// Fold the outcome into `job`. Returns the status before the change.
    pub fn apply(self, job: &mut Job) -> TaskStatus {
        let from = job.active_status;
        match self {
            Self::Succeeded { actions } => {
                for action in actions {
                    job.add_action(action);
                }
                if let Some(task_id) = job.active_task_id.clone() {
                    job.mark_task_complete(&task_id);
                } else {
                    job.set_status(TaskStatus::Complete);
                }
            }
            Self::Failed { message } => job.record_error(message),
            Self::Misconfigured { message } => job.fail_configuration(message),
            Self::Cancelled { actions } => {
                for action in actions {
                    job.add_action(action);
                }
                job.set_status(TaskStatus::Cancelled);
            }
        }
        from
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use taskline_core::job_kind::GenericSpec;
    use taskline_core::task_id::TaskId;

    use super::*;

    fn running_job() -> Job {
        let mut job = Job::new(
            Box::new(GenericSpec::default()),
            Some(TaskId::pipeline("m", "p")),
            "/data",
        );
        job.activate(TaskId::task("m", "a"), TaskStatus::Running);
        job
    }

    #[test]
    fn success_completes_the_active_task() {
        let mut job = running_job();
        let mut action = RecordedAction::start(TaskId::task("m", "a"), "a");
        action.complete();

        let from = TaskOutcome::Succeeded { actions: vec![action] }.apply(&mut job);
        assert_eq!(from, TaskStatus::Running);
        assert_eq!(job.active_status, TaskStatus::Complete);
        assert!(job.is_task_complete(&TaskId::task("m", "a")));
        assert_eq!(job.actions.len(), 1);
    }

    #[test]
    fn failure_counts_but_misconfiguration_does_not() {
        let mut job = running_job();
        TaskOutcome::Failed { message: "boom".into() }.apply(&mut job);
        assert_eq!(job.error_count, 1);
        assert_eq!(job.active_status, TaskStatus::Error);

        let mut job = running_job();
        TaskOutcome::Misconfigured { message: "bad".into() }.apply(&mut job);
        assert_eq!(job.error_count, 0);
        assert_eq!(job.active_status, TaskStatus::Error);
    }

    #[test]
    fn interrupted_outcomes_end_cancelled() {
        let mut action = RecordedAction::start(TaskId::task("m", "a"), "a");
        action.complete();
        let kept = TaskOutcome::Succeeded { actions: vec![action] }.into_cancelled();
        assert_matches!(&kept, TaskOutcome::Cancelled { actions } if actions.len() == 1);

        let failed = TaskOutcome::Failed { message: "cancelled mid-write".into() }.into_cancelled();
        assert_matches!(failed, TaskOutcome::Cancelled { actions } if actions.is_empty());

        let mut job = running_job();
        kept.apply(&mut job);
        assert_eq!(job.active_status, TaskStatus::Cancelled);
        assert!(!job.is_task_complete(&TaskId::task("m", "a")));
    }

    #[test]
    fn cancellation_is_not_an_error() {
        let mut job = running_job();
        TaskOutcome::from_result(Err(CoreError::Cancelled)).apply(&mut job);
        assert_eq!(job.active_status, TaskStatus::Cancelled);
        assert_eq!(job.error_count, 0);
    }

    #[test]
    fn classification_of_errors() {
        assert_matches!(
            TaskOutcome::from_result(Err(CoreError::Configuration("x".into()))),
            TaskOutcome::Misconfigured { .. }
        );
        assert_matches!(
            TaskOutcome::from_result(Err(CoreError::Infrastructure("x".into()))),
            TaskOutcome::Failed { .. }
        );
    }

    #[test]
    fn outcome_wire_format_is_tagged() {
        let outcome: TaskOutcome =
            serde_json::from_str(r#"{"outcome":"failed","message":"exit 1"}"#).unwrap();
        assert_matches!(outcome, TaskOutcome::Failed { message } if message == "exit 1");
    }
}
