//! Zero-sized repositories taking a `&PgPool` per call.

pub mod pipeline_job_repo;

pub use pipeline_job_repo::PipelineJobRepo;
