//! Row structs and insert DTOs.

pub mod pipeline_job;
