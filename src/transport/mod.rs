//! Retrying binary transfer layer
//!
//! [`RetryTransport`] wraps a single-attempt [`TransferExecutor`] with outcome
//! classification and exponential backoff. The production executor is a
//! reqwest PUT with a chunk-streamed body so callers get fractional upload
//! progress; tests script the seam directly.

use crate::error::{IngestError, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use futures_util::stream;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Chunk granularity for streamed upload bodies; each chunk boundary is a
/// progress tick.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Typed callback surface for a single transfer.
///
/// `on_progress` receives 0..=100; `on_status_note` receives human-readable
/// annotations such as the retry notice shown in the staging UI.
pub trait TransferObserver: Send + Sync {
    fn on_progress(&self, _percent: f64) {}
    fn on_status_note(&self, _note: &str) {}
}

/// Observer that drops every event.
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// Status and body of one completed HTTP attempt, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Executes exactly one PUT-style attempt. Network-level failures are
/// reported as `Err`, anything the server answered as `Ok(RawResponse)`.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        payload: &[u8],
        observer: Arc<dyn TransferObserver>,
    ) -> Result<RawResponse>;
}

/// Production executor backed by reqwest with a streamed body.
pub struct HttpTransferExecutor {
    client: reqwest::Client,
}

impl HttpTransferExecutor {
    pub fn new(request_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .connect_timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

#[async_trait]
impl TransferExecutor for HttpTransferExecutor {
    async fn put(
        &self,
        url: &str,
        headers: &[(String, String)],
        payload: &[u8],
        observer: Arc<dyn TransferObserver>,
    ) -> Result<RawResponse> {
        let total = payload.len().max(1) as u64;
        let sent = Arc::new(AtomicU64::new(0));

        let chunks: Vec<Vec<u8>> = payload
            .chunks(UPLOAD_CHUNK_SIZE)
            .map(|c| c.to_vec())
            .collect();

        let progress_observer = observer.clone();
        let counter = sent.clone();
        let body_stream = stream::iter(chunks.into_iter().map(move |chunk| {
            let loaded = counter.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
            progress_observer.on_progress((loaded as f64 / total as f64) * 100.0);
            Ok::<_, std::io::Error>(chunk)
        }));

        let mut request = self
            .client
            .put(url)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", payload.len().to_string())
            .body(reqwest::Body::wrap_stream(body_stream));

        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Network(format!("Transfer failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Network(format!("Failed to read response body: {}", e)))?;

        Ok(RawResponse { status, body })
    }
}

/// Generic retrying transfer for idempotent PUT-style uploads.
pub struct RetryTransport {
    executor: Arc<dyn TransferExecutor>,
    max_retries: u32,
    initial_backoff: Duration,
    logger: Logger,
}

impl RetryTransport {
    pub fn new(executor: Arc<dyn TransferExecutor>, logger: Logger) -> Self {
        Self {
            executor,
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(crate::config::DEFAULT_INITIAL_BACKOFF_MS),
            logger,
        }
    }

    pub fn with_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    /// Runs the transfer, retrying transient failures with exponential
    /// backoff. Resolves with the parsed JSON response body (`{}` when the
    /// server sent none).
    pub async fn transfer(
        &self,
        url: &str,
        headers: &[(String, String)],
        payload: &[u8],
        observer: Arc<dyn TransferObserver>,
    ) -> Result<serde_json::Value> {
        let mut remaining = self.max_retries;

        loop {
            let outcome = match self
                .executor
                .put(url, headers, payload, observer.clone())
                .await
            {
                Ok(response) => classify(response),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && remaining > 0 => {
                    let retry_index = self.max_retries - remaining + 1;
                    let delay = self.backoff_delay(retry_index);
                    self.logger.verbose(&format!(
                        "Transfer attempt failed ({}). Retrying in {}ms... ({} left)",
                        err,
                        delay.as_millis(),
                        remaining
                    ));
                    observer.on_status_note(&format!("Optimizing route... ({} left)", remaining));
                    sleep(delay).await;
                    remaining -= 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(IngestError::RetriesExhausted(err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Backoff for the k-th retry (1-indexed): initial * 2^(k-1), +/-20%
    /// uniform jitter.
    fn backoff_delay(&self, retry_index: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64 * 2f64.powi(retry_index as i32 - 1);
        let jitter = base * 0.2 * rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

/// Maps one HTTP response to a success value or a classified error.
///
/// 2xx parses the body as JSON (empty body is an empty object); 5xx, 408 and
/// 429 are retryable server errors; every other 4xx is permanent.
fn classify(response: RawResponse) -> Result<serde_json::Value> {
    match response.status {
        200..=299 => {
            if response.body.trim().is_empty() {
                Ok(serde_json::json!({}))
            } else {
                serde_json::from_str(&response.body).map_err(|e| {
                    IngestError::Parse(format!("Invalid JSON response: {}", e))
                })
            }
        }
        408 | 429 => Err(IngestError::Server(format!(
            "HTTP {}: transient server pressure",
            response.status
        ))),
        500..=599 => Err(IngestError::Server(format!(
            "HTTP {}: {}",
            response.status,
            snippet(&response.body)
        ))),
        status => Err(IngestError::Permanent(format!(
            "HTTP {}: {}",
            status,
            snippet(&response.body)
        ))),
    }
}

fn snippet(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body";
    }
    // Cut on a char boundary; error bodies are often non-ASCII HTML pages.
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => &trimmed[..cut],
        None => trimmed,
    }
}
