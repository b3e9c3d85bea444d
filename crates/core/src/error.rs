//! Error taxonomy shared by every crate in the workspace.
//!
//! The variants map onto the engine's failure classes: configuration errors
//! are fatal before any task runs, task failures feed the auto-retry policy,
//! infrastructure errors are retried transparently before degrading into the
//! task failure path, and cancellation is reported separately from errors.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Configuration errors never consume an auto-retry.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Whether the infrastructure layer may transparently retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Infrastructure(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = CoreError::not_found("job", "abc");
        assert_eq!(err.to_string(), "Entity not found: job with id abc");
    }

    #[test]
    fn io_errors_are_retryable_infrastructure_errors() {
        let err: CoreError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(err.is_retryable());
        assert!(!err.is_configuration());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = CoreError::Configuration("missing factory".into());
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancellation_is_its_own_class() {
        assert!(CoreError::Cancelled.is_cancelled());
        assert!(!CoreError::TaskFailed("x".into()).is_cancelled());
    }
}
