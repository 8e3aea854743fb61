//! Error types for the ingestion and job-tracking pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// Network-level failure (DNS, connect, broken transfer). Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a retryable status (5xx, 408, 429).
    #[error("Server error: {0}")]
    Server(String),

    /// Client-side request error (4xx other than 408/429). Never retried.
    #[error("Request rejected: {0}")]
    Permanent(String),

    /// Every allowed attempt failed; carries the last observed reason.
    #[error("Upload failed after retries: {0}")]
    RetriesExhausted(String),

    /// Metadata registration (phase 1 of an upload) failed.
    #[error("Registration error: {0}")]
    Registration(String),

    /// The tracked job returned 404; the server no longer knows it.
    #[error("Job not found on server: {0}")]
    JobVanished(String),

    /// Wall-clock budget elapsed before the job reached a terminal state.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Unexpected response status or shape from the backend API.
    #[error("API error: {0}")]
    Api(String),

    /// Authentication failure.
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Io(err.to_string())
    }
}

impl From<url::ParseError> for IngestError {
    fn from(err: url::ParseError) -> Self {
        IngestError::Validation(err.to_string())
    }
}

impl IngestError {
    /// Whether another attempt could plausibly succeed without the caller
    /// changing anything about the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Network(_) | IngestError::Server(_) | IngestError::Parse(_)
        )
    }
}
