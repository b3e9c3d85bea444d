//! Job lifecycle events.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the event envelope published on every status transition,
//!   split, join and retry.
//! - [`JobJournal`]: background service that appends every event to the
//!   job's own log file.

pub mod bus;
pub mod journal;

pub use bus::{EventBus, JobEvent};
pub use journal::JobJournal;
