//! Two-phase upload coordination
//!
//! Phase 1 registers file metadata and receives a transfer URL; phase 2 puts
//! the raw bytes through the retrying transport. Phase 1 failures are
//! configuration/client errors and propagate without retries.

use crate::api::{IngestApi, SessionStore, UploadMetadata};
use crate::error::{IngestError, Result};
use crate::transport::{RetryTransport, TransferObserver};
use async_trait::async_trait;
use std::sync::Arc;

/// Server-issued identifier for uploaded content.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub id: String,
}

/// Single-file upload seam consumed by the staging registry.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
        observer: Arc<dyn TransferObserver>,
    ) -> Result<UploadReceipt>;
}

pub struct UploadCoordinator {
    api: Arc<dyn IngestApi>,
    transport: RetryTransport,
    session: SessionStore,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn IngestApi>, transport: RetryTransport, session: SessionStore) -> Self {
        Self {
            api,
            transport,
            session,
        }
    }

    fn transfer_headers(&self) -> Vec<(String, String)> {
        match self.session.bearer() {
            Some(token) => vec![("Authorization".to_string(), format!("Bearer {}", token))],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Uploader for UploadCoordinator {
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
        observer: Arc<dyn TransferObserver>,
    ) -> Result<UploadReceipt> {
        let meta = UploadMetadata {
            filename: name.to_string(),
            file_type: mime_type.to_string(),
            file_size: bytes.len() as u64,
        };
        let ticket = self.api.register_upload(&meta).await?;

        let response = self
            .transport
            .transfer(&ticket.upload_url, &self.transfer_headers(), bytes, observer)
            .await?;

        let id = response
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                IngestError::Parse("Upload response missing content id".to_string())
            })?;
        Ok(UploadReceipt { id: id.to_string() })
    }
}
