//! Backend API client
//!
//! [`ApiClient`] speaks the ingestion/report HTTP contract: login, upload
//! metadata registration, job creation and job status queries. The bearer
//! token lives in a [`SessionStore`] shared across the process so every
//! authenticated call picks it up automatically.

use crate::config::ClientConfig;
use crate::error::{IngestError, Result};
use crate::logging::Logger;
use crate::poller::{JobStatusReport, JobStatusSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Process-wide bearer token holder.
///
/// Cloned freely; all clones observe the same token. `store` on login,
/// `clear` on logout.
#[derive(Clone, Default)]
pub struct SessionStore {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }

    pub fn bearer(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }
}

/// Metadata sent to register an upload before any bytes move.
#[derive(Debug, Clone, Serialize)]
pub struct UploadMetadata {
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
}

/// Phase-1 response: where to PUT the binary payload.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
}

#[derive(Serialize)]
struct JobRequest<'a> {
    file_ids: &'a [String],
    project_id: &'a str,
}

#[derive(Deserialize)]
struct JobCreated {
    job_id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ApiDetail {
    detail: String,
}

/// Ingestion-side API surface consumed by the upload coordinator.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Registers upload metadata; the returned ticket carries the transfer
    /// URL. Not retried: a failure here is a request that will not succeed
    /// unmodified.
    async fn register_upload(&self, meta: &UploadMetadata) -> Result<UploadTicket>;
}

pub struct ApiClient {
    config: ClientConfig,
    client: reqwest::Client,
    session: SessionStore,
    logger: Logger,
}

impl ApiClient {
    pub fn new(config: ClientConfig, session: SessionStore, logger: Logger) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| IngestError::Validation(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            session,
            logger,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session.bearer() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Extracts the backend's `detail` message when present, otherwise a
    /// generic status line.
    async fn failure_detail(response: reqwest::Response, fallback: &str) -> String {
        let status = response.status();
        match response.json::<ApiDetail>().await {
            Ok(detail) => detail.detail,
            Err(_) => format!("{} (HTTP {})", fallback, status.as_u16()),
        }
    }

    /// `POST /auth/login`, OAuth2 password form. Stores the access token in
    /// the session on success.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = self.config.endpoint("/auth/login")?;
        let response = self
            .client
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Auth(
                Self::failure_detail(response, "Login failed").await,
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Parse(format!("Malformed login response: {}", e)))?;
        self.session.store(token.access_token);
        self.logger.verbose("Session token stored");
        Ok(())
    }

    /// `POST /reports/jobs`: creates an analysis job over uploaded files.
    pub async fn create_job(&self, file_ids: &[String], project_id: &str) -> Result<String> {
        if file_ids.is_empty() {
            return Err(IngestError::Validation(
                "Cannot create a job with no uploaded files".to_string(),
            ));
        }

        let url = self.config.endpoint("/reports/jobs")?;
        let response = self
            .authorized(self.client.post(&url))
            .json(&JobRequest {
                file_ids,
                project_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Api(
                Self::failure_detail(response, "Job creation failed").await,
            ));
        }

        let created: JobCreated = response
            .json()
            .await
            .map_err(|e| IngestError::Parse(format!("Malformed job response: {}", e)))?;
        Ok(created.job_id)
    }

    /// Resolves a possibly relative upload URL against the configured base.
    fn resolve_upload_url(&self, upload_url: &str) -> Result<String> {
        if upload_url.starts_with("http://") || upload_url.starts_with("https://") {
            Ok(upload_url.to_string())
        } else {
            self.config.endpoint(upload_url)
        }
    }
}

#[async_trait]
impl IngestApi for ApiClient {
    async fn register_upload(&self, meta: &UploadMetadata) -> Result<UploadTicket> {
        let url = self.config.endpoint("/ingest/meta")?;
        let response = self
            .authorized(self.client.post(&url))
            .json(meta)
            .send()
            .await
            .map_err(|e| IngestError::Registration(format!("Metadata registration failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IngestError::Registration(
                Self::failure_detail(response, "Metadata registration rejected").await,
            ));
        }

        let mut ticket: UploadTicket = response
            .json()
            .await
            .map_err(|e| IngestError::Parse(format!("Malformed registration response: {}", e)))?;
        ticket.upload_url = self.resolve_upload_url(&ticket.upload_url)?;
        Ok(ticket)
    }
}

#[async_trait]
impl JobStatusSource for ApiClient {
    /// `GET /reports/jobs/{job_id}`: one status query. A 404 means the
    /// server no longer knows the job (restart) and is surfaced as the
    /// distinct [`IngestError::JobVanished`].
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport> {
        let url = self.config.endpoint(&format!("/reports/jobs/{}", job_id))?;
        let response = self.authorized(self.client.get(&url)).send().await?;

        if response.status().as_u16() == 404 {
            return Err(IngestError::JobVanished(job_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(IngestError::Api(format!(
                "Status query failed with HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| IngestError::Parse(format!("Malformed status response: {}", e)))
    }
}
