//! Staged-file lifecycle and batch upload orchestration
//!
//! Files accepted by the client live here until their upload completes. The
//! registry owns per-file state transitions and fans the batch out as
//! concurrent uploads; per-file failures never abort the batch.

use crate::logging::Logger;
use crate::transport::TransferObserver;
use crate::upload::Uploader;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Per-file upload state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Staged,
    Uploading,
    Complete,
    Error,
}

/// A file accepted by the client but not yet (or no longer) in flight.
#[derive(Debug)]
pub struct StagedFile {
    pub id: Uuid,
    pub name: String,
    pub byte_size: u64,
    pub mime_type: String,
    /// Payload bytes; owned exclusively by the staged file until upload
    /// completes.
    raw_content: Vec<u8>,
    pub status: FileStatus,
    /// 0..=100, meaningful only while `Uploading`.
    pub progress: f64,
    pub message: String,
    /// Set iff `status == Complete`.
    pub backend_id: Option<String>,
}

/// Raw input handed over from the UI (drop or paste).
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Read-only view of one staged file, without the payload bytes.
#[derive(Debug, Clone)]
pub struct FileView {
    pub id: Uuid,
    pub name: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub status: FileStatus,
    pub progress: f64,
    pub message: String,
    pub backend_id: Option<String>,
}

impl StagedFile {
    fn view(&self) -> FileView {
        FileView {
            id: self.id,
            name: self.name.clone(),
            byte_size: self.byte_size,
            mime_type: self.mime_type.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            backend_id: self.backend_id.clone(),
        }
    }
}

/// Ordered collection of staged files (insertion order preserved) plus the
/// batch-level upload orchestration.
#[derive(Clone)]
pub struct StagingRegistry {
    files: Arc<Mutex<Vec<StagedFile>>>,
    logger: Logger,
}

impl StagingRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            files: Arc::new(Mutex::new(Vec::new())),
            logger,
        }
    }

    /// Wraps each input as a staged file and appends it. Does not start any
    /// upload.
    pub fn add_files(&self, inputs: Vec<IncomingFile>) -> Vec<Uuid> {
        let mut guard = self.files.lock().expect("staging lock poisoned");
        inputs
            .into_iter()
            .map(|input| {
                let id = Uuid::new_v4();
                guard.push(StagedFile {
                    id,
                    name: input.name,
                    byte_size: input.content.len() as u64,
                    mime_type: input.mime_type,
                    raw_content: input.content,
                    status: FileStatus::Staged,
                    progress: 0.0,
                    message: String::new(),
                    backend_id: None,
                });
                id
            })
            .collect()
    }

    /// Removes a staged file; a no-op when the id is unknown.
    pub fn remove_file(&self, id: Uuid) {
        let mut guard = self.files.lock().expect("staging lock poisoned");
        guard.retain(|file| file.id != id);
    }

    /// Unconditionally empties the collection.
    pub fn clear_batch(&self) {
        let mut guard = self.files.lock().expect("staging lock poisoned");
        guard.clear();
    }

    pub fn snapshot(&self) -> Vec<FileView> {
        let guard = self.files.lock().expect("staging lock poisoned");
        guard.iter().map(StagedFile::view).collect()
    }

    /// Backend ids of every completed upload, in staging order.
    pub fn backend_ids(&self) -> Vec<String> {
        let guard = self.files.lock().expect("staging lock poisoned");
        guard
            .iter()
            .filter(|file| file.status == FileStatus::Complete)
            .filter_map(|file| file.backend_id.clone())
            .collect()
    }

    /// Uploads every file still in `Staged` or `Error` state, all at once.
    ///
    /// Entries already `Complete` are left untouched, so re-invoking after a
    /// partial failure only re-attempts what actually failed and never mints
    /// duplicate backend ids. Resolves once every launched upload settled;
    /// per-file failures are captured in that file's status, never returned.
    pub async fn upload_batch(&self, uploader: Arc<dyn Uploader>) {
        let candidates: Vec<(Uuid, String, String, Vec<u8>)> = {
            let mut guard = self.files.lock().expect("staging lock poisoned");
            guard
                .iter_mut()
                .filter(|file| {
                    matches!(file.status, FileStatus::Staged | FileStatus::Error)
                })
                .map(|file| {
                    file.status = FileStatus::Uploading;
                    file.progress = 0.0;
                    file.message = "INITIALIZING UPLINK...".to_string();
                    (
                        file.id,
                        file.name.clone(),
                        file.mime_type.clone(),
                        file.raw_content.clone(),
                    )
                })
                .collect()
        };

        let uploads = candidates.into_iter().map(|(id, name, mime, bytes)| {
            let uploader = uploader.clone();
            let registry = self.clone();
            async move {
                let observer: Arc<dyn TransferObserver> = Arc::new(FileProgressObserver {
                    files: registry.files.clone(),
                    id,
                });
                match uploader.upload(&name, &mime, &bytes, observer).await {
                    Ok(receipt) => {
                        registry.update_file(id, |file| {
                            file.status = FileStatus::Complete;
                            file.progress = 100.0;
                            file.message = "SYNC COMPLETE".to_string();
                            file.backend_id = Some(receipt.id.clone());
                        });
                    }
                    Err(err) => {
                        registry
                            .logger
                            .warning(&format!("Failed to upload {}: {}", name, err));
                        registry.update_file(id, |file| {
                            file.status = FileStatus::Error;
                            file.progress = 0.0;
                            file.message = "TRANSMISSION FAILED".to_string();
                            file.backend_id = None;
                        });
                    }
                }
            }
        });

        join_all(uploads).await;
    }

    /// Applies a mutation to the file with `id`; silently skipped when the
    /// file was removed in the meantime (stale-callback guard).
    fn update_file(&self, id: Uuid, apply: impl FnOnce(&mut StagedFile)) {
        let mut guard = self.files.lock().expect("staging lock poisoned");
        if let Some(file) = guard.iter_mut().find(|file| file.id == id) {
            apply(file);
        }
    }
}

/// Routes transfer progress/status events into one staged file's state.
struct FileProgressObserver {
    files: Arc<Mutex<Vec<StagedFile>>>,
    id: Uuid,
}

impl TransferObserver for FileProgressObserver {
    fn on_progress(&self, percent: f64) {
        if let Ok(mut guard) = self.files.lock() {
            if let Some(file) = guard.iter_mut().find(|file| file.id == self.id) {
                file.progress = percent.clamp(0.0, 100.0);
                file.message = "TRANSMITTING...".to_string();
            }
        }
    }

    fn on_status_note(&self, note: &str) {
        if let Ok(mut guard) = self.files.lock() {
            if let Some(file) = guard.iter_mut().find(|file| file.id == self.id) {
                file.message = note.to_string();
            }
        }
    }
}
