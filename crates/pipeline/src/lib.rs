//! Job dispatch and execution.
//!
//! The [`Dispatcher`] is the single entry point for submitted jobs. It runs
//! the state-machine driver, checkpoints every transition through the job
//! store and routes active tasks to their execution location. Local tasks
//! run on runner loops inside this process; polling locations wait for
//! external workers to claim and report; engine locations are submitted to
//! a [`taskline_remote::RemoteEngine`] and watched by the monitor.

pub mod control;
pub mod dispatcher;
pub mod join;
pub mod location;
pub mod monitor;
pub mod outcome;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod services;

pub use dispatcher::Dispatcher;
pub use location::{Location, LocationKind, Locations};
pub use outcome::TaskOutcome;
pub use retry::InfraRetryConfig;
pub use services::Services;
