//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is shared
//! via `Arc<EventBus>` between the dispatcher and its runners.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use taskline_core::job::Job;
use taskline_core::status::TaskStatus;
use taskline_core::types::JobGuid;

/// Event type names.
pub mod event_types {
    pub const STATUS_CHANGED: &str = "job.status_changed";
    pub const SPLIT: &str = "job.split";
    pub const JOINED: &str = "job.joined";
    pub const RETRYING: &str = "job.retrying";
    pub const ERROR: &str = "job.error";
}

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job.
///
/// Constructed via [`JobEvent::for_job`] and enriched with the builder
/// methods [`with_transition`](JobEvent::with_transition),
/// [`with_message`](JobEvent::with_message) and
/// [`with_payload`](JobEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.status_changed"`.
    pub event_type: String,

    pub job_guid: JobGuid,

    pub parent_guid: Option<JobGuid>,

    /// Canonical id of the active task at the time of the event.
    pub task_id: Option<String>,

    pub from_status: Option<TaskStatus>,

    pub status: TaskStatus,

    /// The job's log file.
    pub log_path: PathBuf,

    pub message: Option<String>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Snapshot the identifying fields of `job`.
    pub fn for_job(event_type: impl Into<String>, job: &Job) -> Self {
        Self {
            event_type: event_type.into(),
            job_guid: job.guid,
            parent_guid: job.parent_guid,
            task_id: job.active_task_id.as_ref().map(ToString::to_string),
            from_status: None,
            status: job.active_status,
            log_path: job.log_path.clone(),
            message: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn status_changed(job: &Job, from: TaskStatus) -> Self {
        Self::for_job(event_types::STATUS_CHANGED, job).with_transition(from)
    }

    pub fn with_transition(mut self, from: TaskStatus) -> Self {
        self.from_status = Some(from);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// One-line rendering used by the job journal.
    pub fn summary(&self) -> String {
        let task = self.task_id.as_deref().unwrap_or("-");
        let mut line = match self.from_status {
            Some(from) => format!("{} {task}: {from} -> {}", self.event_type, self.status),
            None => format!("{} {task}: {}", self.event_type, self.status),
        };
        if let Some(message) = &self.message {
            line.push_str(": ");
            line.push_str(message);
        }
        line
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use taskline_events::bus::EventBus;
///
/// let bus = EventBus::default();
/// let _rx = bus.subscribe();
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped when nobody
    /// is subscribed.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(event_type = %event.event_type, job_guid = %event.job_guid, "Publishing job event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use taskline_core::job_kind::GenericSpec;
    use taskline_core::task_id::TaskId;

    use super::*;

    fn job() -> Job {
        let mut job = Job::new(
            Box::new(GenericSpec::default()),
            Some(TaskId::pipeline("m", "p")),
            "/data",
        );
        job.activate(TaskId::task("m", "a"), TaskStatus::Running);
        job
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let job = job();

        bus.publish(JobEvent::status_changed(&job, TaskStatus::Waiting));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, event_types::STATUS_CHANGED);
        assert_eq!(received.job_guid, job.guid);
        assert_eq!(received.task_id.as_deref(), Some("m:task:a"));
        assert_eq!(received.from_status, Some(TaskStatus::Waiting));
        assert_eq!(received.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(JobEvent::for_job(event_types::SPLIT, &job()));

        assert_eq!(rx1.recv().await.unwrap().event_type, event_types::SPLIT);
        assert_eq!(rx2.recv().await.unwrap().event_type, event_types::SPLIT);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(JobEvent::for_job(event_types::JOINED, &job()));
    }

    #[test]
    fn summary_mentions_transition_and_message() {
        let event = JobEvent::status_changed(&job(), TaskStatus::Waiting).with_message("started");
        assert_eq!(
            event.summary(),
            "job.status_changed m:task:a: waiting -> running: started"
        );
    }
}
