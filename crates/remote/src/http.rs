//! JSON-over-HTTP remote engine adapter.
//!
//! | Operation | Request                    | Response                                |
//! |-----------|----------------------------|-----------------------------------------|
//! | submit    | `POST {base}/jobs`         | `{ "remote_id": "..." }`                |
//! | poll      | `GET {base}/jobs/{id}`     | `{ "status", "message"?, "job"? }`      |
//! | cancel    | `DELETE {base}/jobs/{id}`  | any 2xx                                 |

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use taskline_core::codec::JobCodec;
use taskline_core::job::Job;

use crate::engine::{RemoteEngine, RemoteStatus};
use crate::error::RemoteError;
use crate::path_mapper::PathMapper;
use crate::translate::{export_job, import_job};

/// HTTP client for a single remote engine endpoint.
pub struct HttpEngine {
    name: String,
    client: reqwest::Client,
    base_url: String,
    mapper: Arc<dyn PathMapper>,
    codec: JobCodec,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    remote_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    job: Option<serde_json::Value>,
}

impl HttpEngine {
    /// * `base_url` - e.g. `http://cluster-gateway:8080`; a trailing slash is
    ///   ignored.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        mapper: Arc<dyn PathMapper>,
        codec: JobCodec,
    ) -> Self {
        Self::with_client(reqwest::Client::new(), name, base_url, mapper, codec)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling across
    /// engines.
    pub fn with_client(
        client: reqwest::Client,
        name: impl Into<String>,
        base_url: impl Into<String>,
        mapper: Arc<dyn PathMapper>,
        codec: JobCodec,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            name: name.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mapper,
            codec,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn job_url(&self, remote_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, remote_id)
    }

    fn decode_status(&self, response: PollResponse) -> Result<RemoteStatus, RemoteError> {
        let status = match response.status.to_ascii_lowercase().as_str() {
            "queued" | "waiting" => RemoteStatus::Queued,
            "running" => RemoteStatus::Running,
            "complete" | "completed" => {
                let job = response
                    .job
                    .map(|value| import_job(value, self.mapper.as_ref(), &self.codec))
                    .transpose()?;
                RemoteStatus::Complete { job }
            }
            "error" | "failed" => RemoteStatus::Error {
                message: response
                    .message
                    .unwrap_or_else(|| "Remote task failed".to_string()),
            },
            "cancelled" => RemoteStatus::Cancelled,
            other => {
                return Err(RemoteError::Protocol(format!(
                    "Unknown remote status '{other}'"
                )))
            }
        };
        Ok(status)
    }

    // ---- private helpers ----

    /// Returns the response unchanged on success, or a
    /// [`RemoteError::Api`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteEngine for HttpEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn path_mapper(&self) -> &dyn PathMapper {
        self.mapper.as_ref()
    }

    async fn submit(&self, job: &Job) -> Result<String, RemoteError> {
        let body = export_job(job, self.mapper.as_ref(), &self.codec)?;

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&body)
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::debug!(
            engine = %self.name,
            job_guid = %job.guid,
            remote_id = %submitted.remote_id,
            "Submitted job to remote engine"
        );
        Ok(submitted.remote_id)
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, RemoteError> {
        let response = self.client.get(self.job_url(remote_id)).send().await?;
        let polled: PollResponse = Self::parse_response(response).await?;
        self.decode_status(polled)
    }

    async fn cancel(&self, remote_id: &str) -> Result<(), RemoteError> {
        let response = self.client.delete(self.job_url(remote_id)).send().await?;
        Self::ensure_success(response).await?;
        tracing::debug!(engine = %self.name, remote_id, "Cancelled remote job");
        Ok(())
    }
}
