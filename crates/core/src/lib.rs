//! Core domain of the task-pipeline execution engine.
//!
//! Everything in this crate is independent of the storage backend and of the
//! transport used to reach remote workers: task identifiers, factories and
//! pipelines, the job entity and its state machine, work directories, and the
//! job store contract.

pub mod action;
pub mod codec;
pub mod command_task;
pub mod copy_lock;
pub mod driver;
pub mod error;
pub mod factory;
pub mod job;
pub mod job_kind;
pub mod job_log;
pub mod pipeline;
pub mod registry;
pub mod settings;
pub mod status;
pub mod store;
pub mod subprocess;
pub mod task;
pub mod task_id;
pub mod types;
pub mod workdir;

#[cfg(test)]
pub(crate) mod test_helpers;
