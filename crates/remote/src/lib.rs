//! Remote execution engine adapters.
//!
//! A remote engine accepts a serialized job, runs its active task on an
//! external compute resource and reports back. Every adapter owns a
//! [`PathMapper`] that translates controller paths to worker paths; jobs are
//! translated on the way out and back in.

pub mod engine;
pub mod error;
pub mod http;
pub mod path_mapper;
pub mod translate;

pub use engine::{RemoteEngine, RemoteStatus};
pub use error::RemoteError;
pub use http::HttpEngine;
pub use path_mapper::{IdentityPathMapper, PathMapper, PrefixPathMapper};
