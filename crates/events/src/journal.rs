//! Per-job event journal.
//!
//! [`JobJournal`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! appends every [`JobEvent`] to the log file of the job it concerns. It runs
//! as a long-lived background task and stops when the bus is dropped.

use taskline_core::job_log::{JobLog, LogLevel};
use tokio::sync::broadcast;

use crate::bus::{event_types, JobEvent};

pub struct JobJournal;

impl JobJournal {
    /// Run the journal loop until the channel closes.
    pub async fn run(mut receiver: broadcast::Receiver<JobEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::record(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Job journal lagged, some events were not written");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, job journal shutting down");
                    break;
                }
            }
        }
    }

    async fn record(event: &JobEvent) {
        let level = if event.event_type == event_types::ERROR {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        JobLog::new(&event.log_path)
            .write(level, &event.summary())
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
