//! Error types for the uploader module

use ossdrive_api::ApiError;
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Upload error types
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Upload was cancelled
    #[error("Upload cancelled")]
    Cancelled,

    /// Task registration failed or returned a malformed response
    #[error("Failed to register upload task: {0}")]
    Registration(String),

    /// Progress subscription failed to open or dropped
    #[error("Progress channel error: {0}")]
    Channel(String),

    /// Destination rejected the transfer
    #[error("Upload rejected: {message}")]
    Transfer {
        status: Option<u16>,
        message: String,
    },

    /// No response: connection refused or lost mid-flight
    #[error("Network failure, no response from server: {0}")]
    Network(String),

    /// Failed to read local file
    #[error("Failed to read local file: {0}")]
    FileRead(String),

    /// Operation not allowed in the task's current state
    #[error("Invalid task state: {0}")]
    InvalidState(String),
}

impl UploadError {
    /// Check if the user may restart the task after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UploadError::Cancelled | UploadError::InvalidState(_))
    }

    /// Check if this error is due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// Classify a failed registration call
    pub fn registration(err: ApiError) -> Self {
        UploadError::Registration(err.to_string())
    }

    /// Wrap a failed or dropped progress subscription
    pub fn channel(err: ApiError) -> Self {
        UploadError::Channel(err.to_string())
    }

    /// Classify a failed transfer call
    pub fn transfer(err: ApiError) -> Self {
        match err {
            ApiError::Network(message) => UploadError::Network(message),
            ApiError::Io(message) => UploadError::FileRead(message),
            ApiError::Http { status, .. } => UploadError::Transfer {
                status: Some(status.as_u16()),
                message: err.to_string(),
            },
            other => UploadError::Transfer {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::FileRead(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_registration_message_identifies_cause() {
        let err = UploadError::registration(ApiError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "boom".into(),
        });
        assert!(err.to_string().contains("500"));

        let err = UploadError::registration(ApiError::Decode("missing id".into()));
        assert!(err.to_string().contains("Malformed response"));

        let err = UploadError::registration(ApiError::Network("refused".into()));
        assert!(err.to_string().contains("Network error"));
    }

    #[test]
    fn test_transfer_distinguishes_rejected_from_no_response() {
        let rejected = UploadError::transfer(ApiError::Http {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "too big".into(),
        });
        match rejected {
            UploadError::Transfer { status, .. } => assert_eq!(status, Some(413)),
            other => panic!("Expected Transfer, got {:?}", other),
        }

        let lost = UploadError::transfer(ApiError::Network("reset".into()));
        assert!(matches!(lost, UploadError::Network(_)));
        assert!(lost.is_retryable());
        assert!(!UploadError::Cancelled.is_retryable());
    }
}
