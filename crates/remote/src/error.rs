use taskline_core::error::CoreError;

/// Errors from the remote engine layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine returned a non-2xx status code.
    #[error("Remote engine error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A path has no counterpart on the other side.
    #[error("Cannot translate path {path}: {reason}")]
    PathMapping { path: String, reason: String },

    /// The engine answered with something that is not a valid response.
    #[error("Invalid remote response: {0}")]
    Protocol(String),

    /// The job could not be encoded or decoded.
    #[error("Job payload error: {0}")]
    Payload(String),
}

impl From<RemoteError> for CoreError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::PathMapping { .. } | RemoteError::Payload(_) => {
                CoreError::Configuration(err.to_string())
            }
            RemoteError::Request(_) | RemoteError::Api { .. } | RemoteError::Protocol(_) => {
                CoreError::Infrastructure(err.to_string())
            }
        }
    }
}
