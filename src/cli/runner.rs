//! Drives the full pipeline: stage, upload, create job, poll to terminal

use crate::api::{ApiClient, SessionStore};
use crate::cli::args::Args;
use crate::config::ClientConfig;
use crate::error::{IngestError, Result};
use crate::logging::Logger;
use crate::poller::{JobPoller, JobStatus};
use crate::staging::{FileStatus, IncomingFile, StagingRegistry};
use crate::transport::{HttpTransferExecutor, RetryTransport};
use crate::upload::UploadCoordinator;
use std::path::Path;
use std::sync::Arc;

pub struct Runner {
    args: Args,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let logger = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        Ok(Self { args, logger })
    }

    pub async fn run(&self) -> Result<()> {
        self.logger.section("Sentiment Ingest");

        self.validate_arguments()?;

        let config = ClientConfig::new(self.args.server.clone())
            .with_poll_timeout(job_timeout_ms(self.args.job_timeout));
        let session = SessionStore::new();
        let api = Arc::new(ApiClient::new(
            config.clone(),
            session.clone(),
            self.logger.clone(),
        )?);

        if let (Some(username), Some(password)) = (&self.args.username, &self.args.password) {
            self.logger.step(&format!("Logging in as {}", username));
            api.login(username, password).await?;
        }

        let registry = self.stage_files().await?;
        self.upload(&registry, api.clone(), &config, session).await?;

        let backend_ids = registry.backend_ids();
        if backend_ids.is_empty() {
            return Err(IngestError::Validation(
                "No file was uploaded successfully; not creating a job".to_string(),
            ));
        }

        self.logger.step(&format!(
            "Creating analysis job over {} file(s)",
            backend_ids.len()
        ));
        let job_id = api.create_job(&backend_ids, &self.args.project).await?;
        self.logger.info(&format!("Job created: {}", job_id));

        self.poll_to_completion(api, &config, &job_id).await?;

        self.logger.success(&format!(
            "Done in {}",
            self.logger.format_duration(self.logger.elapsed())
        ));
        Ok(())
    }

    fn validate_arguments(&self) -> Result<()> {
        if self.args.username.is_some() != self.args.password.is_some() {
            return Err(IngestError::Validation(
                "Username and password must be provided together".to_string(),
            ));
        }
        for path in &self.args.files {
            if !path.is_file() {
                return Err(IngestError::Validation(format!(
                    "Not a regular file: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    async fn stage_files(&self) -> Result<StagingRegistry> {
        let registry = StagingRegistry::new(self.logger.clone());
        let mut inputs = Vec::with_capacity(self.args.files.len());
        for path in &self.args.files {
            let content = tokio::fs::read(path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            self.logger.detail(&format!(
                "Staging {} ({})",
                name,
                self.logger.format_size(content.len() as u64)
            ));
            inputs.push(IncomingFile {
                mime_type: mime_for(path).to_string(),
                name,
                content,
            });
        }
        registry.add_files(inputs);
        self.logger
            .info(&format!("Staged {} file(s)", self.args.files.len()));
        Ok(registry)
    }

    async fn upload(
        &self,
        registry: &StagingRegistry,
        api: Arc<ApiClient>,
        config: &ClientConfig,
        session: SessionStore,
    ) -> Result<()> {
        self.logger.step("Uploading batch");

        let executor = Arc::new(HttpTransferExecutor::new(config.request_timeout_secs));
        let transport = RetryTransport::new(executor, self.logger.clone())
            .with_policy(config.max_retries, config.initial_backoff());
        let coordinator = Arc::new(UploadCoordinator::new(api, transport, session));

        registry.upload_batch(coordinator).await;

        for file in registry.snapshot() {
            match file.status {
                FileStatus::Complete => self.logger.success(&format!(
                    "{} -> {}",
                    file.name,
                    file.backend_id.as_deref().unwrap_or("?")
                )),
                FileStatus::Error => self
                    .logger
                    .warning(&format!("{}: {}", file.name, file.message)),
                _ => {}
            }
        }
        Ok(())
    }

    async fn poll_to_completion(
        &self,
        api: Arc<ApiClient>,
        config: &ClientConfig,
        job_id: &str,
    ) -> Result<()> {
        self.logger.step("Tracking analysis job");

        let poller = JobPoller::new(api, self.logger.clone())
            .with_timing(config.poll_interval(), config.poll_timeout());
        let mut rx = poller.track(job_id);
        let mut visual = 0.0;

        loop {
            let job = rx.borrow_and_update().clone();
            visual = crate::zeno::visual_progress(job.progress as f64, job.status.into(), visual);

            match job.status {
                JobStatus::Completed => {
                    self.logger.success("Analysis completed");
                    if let Some(payload) = &job.payload {
                        if !self.logger.quiet {
                            println!("{}", serde_json::to_string_pretty(payload)?);
                        }
                    }
                    return Ok(());
                }
                JobStatus::Failed => {
                    return Err(IngestError::Api(
                        job.error.unwrap_or_else(|| "Job failed".to_string()),
                    ));
                }
                JobStatus::Timeout => {
                    return Err(IngestError::Timeout(
                        job.error.unwrap_or_else(|| "Job timed out".to_string()),
                    ));
                }
                _ => {
                    self.logger.detail(&format!(
                        "{:?} {}% (displaying {:.1}%)",
                        job.status, job.progress, visual
                    ));
                }
            }

            if rx.changed().await.is_err() {
                return Err(IngestError::Api(
                    "Job tracking channel closed unexpectedly".to_string(),
                ));
            }
        }
    }
}

fn job_timeout_ms(seconds: u64) -> u64 {
    seconds.saturating_mul(1000)
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("tsv") => "text/tab-separated-values",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_known_extensions() {
        assert_eq!(mime_for(Path::new("a.csv")), "text/csv");
        assert_eq!(mime_for(Path::new("b.JSON")), "application/json");
        assert_eq!(mime_for(Path::new("notes.txt")), "text/plain");
        assert_eq!(mime_for(Path::new("blob.bin")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_job_timeout_saturates_on_absurd_values() {
        assert_eq!(job_timeout_ms(45), 45_000);
        assert_eq!(job_timeout_ms(u64::MAX), u64::MAX);
    }
}
