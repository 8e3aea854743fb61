//! Client configuration

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default poll cadence while a job is running.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
/// Wall-clock budget for a job to reach a terminal state.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 45_000;
/// Retries allowed beyond the first transfer attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Backoff before the first retry; doubles per retry, jittered +/-20%.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Pipeline configuration shared by the API client, the upload transport and
/// the job poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: 300,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff_ms: u64) -> Self {
        self.initial_backoff_ms = backoff_ms;
        self
    }

    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_poll_timeout(mut self, timeout_ms: u64) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }

    pub fn with_request_timeout(mut self, timeout_secs: u64) -> Self {
        self.request_timeout_secs = timeout_secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(IngestError::Validation(
                "Base URL cannot be empty".to_string(),
            ));
        }
        let url = Url::parse(&self.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(IngestError::Validation(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(IngestError::Validation(
                "Poll interval must be non-zero".to_string(),
            ));
        }
        if self.poll_timeout_ms <= self.poll_interval_ms {
            return Err(IngestError::Validation(
                "Poll timeout must exceed the poll interval".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<String> {
        let base = Url::parse(&self.base_url)?;
        Ok(base.join(path)?.to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}
