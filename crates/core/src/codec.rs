//! Persisted payload encoding of jobs.
//!
//! A payload is `{ "kind": <discriminator>, "job": <job>, "spec": <spec> }`.
//! The kind-specific part is decoded through the [`JobKindRegistry`] so every job kind
//! round-trips without the store knowing about it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::job::Job;
use crate::job_kind::JobKindRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub kind: String,
    pub job: Value,
    pub spec: Value,
}

#[derive(Clone, Default)]
pub struct JobCodec {
    kinds: JobKindRegistry,
}

impl JobCodec {
    pub fn new(kinds: JobKindRegistry) -> Self {
        Self { kinds }
    }

    pub fn kinds(&self) -> &JobKindRegistry {
        &self.kinds
    }

    pub fn to_payload(&self, job: &Job) -> Result<JobPayload, CoreError> {
        Ok(JobPayload {
            kind: job.spec.kind().to_string(),
            job: serde_json::to_value(job)?,
            spec: job.spec.to_value()?,
        })
    }

    pub fn from_payload(&self, payload: JobPayload) -> Result<Job, CoreError> {
        let mut job: Job = serde_json::from_value(payload.job)?;
        job.spec = self.kinds.decode(&payload.kind, payload.spec)?;
        Ok(job)
    }

    pub fn encode(&self, job: &Job) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self.to_payload(job)?)?)
    }

    /// Decode a payload. The revision is left at zero; stores set it.
    pub fn decode(&self, value: Value) -> Result<Job, CoreError> {
        let payload: JobPayload = serde_json::from_value(value)
            .map_err(|e| CoreError::Internal(format!("Malformed job payload: {e}")))?;
        self.from_payload(payload)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::action::RecordedAction;
    use crate::job_kind::FileAnalysisSpec;
    use crate::status::TaskStatus;
    use crate::task_id::TaskId;

    fn sample_job() -> Job {
        let mut job = Job::new(
            Box::new(FileAnalysisSpec::new("search", true)),
            Some(TaskId::pipeline("ms2", "default")),
            "/data/analysis",
        )
        .with_inputs(["/data/a.raw"])
        .with_parameter("threshold", "0.05");
        job.parent_guid = Some(uuid::Uuid::new_v4());
        job.activate(TaskId::task("ms2", "search"), TaskStatus::Error);
        job.active_task_retries = 2;
        job.error_count = 3;
        let mut action = RecordedAction::start(TaskId::task("ms2", "convert"), "convert");
        action.add_output("mzxml", "/data/analysis/a.mzXML");
        action.complete();
        job.add_action(action);
        job.revision = 7;
        job
    }

    #[test]
    fn round_trip_preserves_identity_and_state() {
        let codec = JobCodec::default();
        let job = sample_job();

        let back = codec.decode(codec.encode(&job).unwrap()).unwrap();

        assert_eq!(back.guid, job.guid);
        assert_eq!(back.parent_guid, job.parent_guid);
        assert_eq!(back.active_task_id, job.active_task_id);
        assert_eq!(back.active_status, job.active_status);
        assert_eq!(back.active_task_retries, 2);
        assert_eq!(back.error_count, 3);
        assert_eq!(back.actions, job.actions);
        assert_eq!(back.parameters, job.parameters);
        assert_eq!(back.spec.kind(), FileAnalysisSpec::KIND);
        assert_eq!(back.revision, 0);
    }

    #[test]
    fn re_encoding_is_structurally_equal() {
        let codec = JobCodec::default();
        let first = codec.encode(&sample_job()).unwrap();
        let second = codec.encode(&codec.decode(first.clone()).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn payload_carries_discriminator() {
        let codec = JobCodec::default();
        let value = codec.encode(&sample_job()).unwrap();
        assert_eq!(value["kind"], "fileAnalysis");
        assert_eq!(value["job"]["activeTaskId"], "ms2:task:search");
        assert_eq!(value["job"]["activeStatus"], "error");
        assert_eq!(value["spec"]["protocolName"], "search");
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let codec = JobCodec::default();
        let mut value = codec.encode(&sample_job()).unwrap();
        value["kind"] = Value::String("legacy".into());
        assert_matches!(codec.decode(value), Err(CoreError::Configuration(_)));
    }

    #[test]
    fn garbage_is_an_internal_error() {
        let codec = JobCodec::default();
        assert_matches!(codec.decode(serde_json::json!([1, 2])), Err(CoreError::Internal(_)));
    }
}
