//! Job path translation across the controller/worker boundary.

use serde_json::Value;
use taskline_core::codec::JobCodec;
use taskline_core::job::Job;

use crate::error::RemoteError;
use crate::path_mapper::PathMapper;

/// Encode `job` with every embedded path rewritten to its worker-side form.
///
/// Fails before anything is sent when a path has no remote counterpart.
pub fn export_job(job: &Job, mapper: &dyn PathMapper, codec: &JobCodec) -> Result<Value, RemoteError> {
    let mut remote = job.clone();
    remote.map_paths(&|p| mapper.local_to_remote(p))?;
    codec
        .encode(&remote)
        .map_err(|e| RemoteError::Payload(e.to_string()))
}

/// Decode a worker-side job payload and rewrite its paths back.
pub fn import_job(value: Value, mapper: &dyn PathMapper, codec: &JobCodec) -> Result<Job, RemoteError> {
    let mut job = codec
        .decode(value)
        .map_err(|e| RemoteError::Payload(e.to_string()))?;
    job.map_paths(&|p| mapper.remote_to_local(p))?;
    Ok(job)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
