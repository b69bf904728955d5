use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Result type for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Response envelope used by every JSON endpoint of the backend
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Both 0 and 200 are used by the backend to signal success
    pub fn is_success(&self) -> bool {
        self.code == 0 || self.code == 200
    }
}

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    /// The server answered 2xx but the envelope carries an error code
    #[error("API error ({code}): {message}")]
    Api { code: i32, message: String },

    /// No response: connection refused, timeout, or the stream broke mid-flight
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Malformed response: {0}")]
    Decode(String),

    /// Local I/O failure while producing a request body
    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Build an error from an envelope whose code signals failure
    pub fn from_response<T>(response: ApiResponse<T>) -> Self {
        let message = if response.message.is_empty() {
            "Unknown error".to_string()
        } else {
            response.message
        };
        ApiError::Api {
            code: response.code,
            message,
        }
    }

    /// True when no response was received at all
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    /// HTTP status for rejected requests
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return ApiError::Http {
                status,
                message: err.to_string(),
            };
        }
        ApiError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}
