//! Error types for the Kapacitor provider.

use thiserror::Error;

/// Errors returned by the Kapacitor HTTP client.
#[derive(Debug, Error)]
pub enum KapacitorError {
    /// The HTTP request could not be sent or its response could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL could not be parsed or joined.
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// A request or response body could not be (de)serialized.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Kapacitor answered 404 for the requested link.
    #[error("not found: {0}")]
    NotFound(String),

    /// Kapacitor answered with a non-success status.
    #[error("Kapacitor returned status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The `error` field of the response body, or the raw body.
        message: String,
    },
}

impl KapacitorError {
    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The Kapacitor API call failed.
    #[error("Kapacitor error: {0}")]
    Kapacitor(#[from] KapacitorError),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Invalid request from client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Returns a reference to the error message for any variant.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Kapacitor(_err) => "kapacitor error (see Debug output)",
            Self::FailedPrecondition(msg) => msg,
            Self::InvalidRequest(msg) => msg,
        }
    }

    /// Error raised when a task type is neither `stream` nor `batch`.
    pub fn unknown_task_type() -> Self {
        Self::Validation("unknown task type".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("task-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: task-123");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("kapacitor_alert".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: kapacitor_alert");

        let err = ProviderError::FailedPrecondition("not configured".to_string());
        assert_eq!(format!("{}", err), "Failed precondition: not configured");
    }

    #[test]
    fn test_kapacitor_error_wraps_verbatim() {
        let err: ProviderError = KapacitorError::Api {
            status: 400,
            message: "invalid TICKscript".to_string(),
        }
        .into();
        assert_eq!(
            format!("{}", err),
            "Kapacitor error: Kapacitor returned status 400: invalid TICKscript"
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(KapacitorError::NotFound("/kapacitor/v1/tasks/x".to_string()).is_not_found());
        assert!(!KapacitorError::Api {
            status: 500,
            message: "boom".to_string()
        }
        .is_not_found());
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::NotFound("task-123".to_string());
        assert_eq!(err.message(), "task-123");

        let err = ProviderError::Configuration("invalid config".to_string());
        assert_eq!(err.message(), "invalid config");

        assert_eq!(ProviderError::unknown_task_type().message(), "unknown task type");
    }
}
