//! End-to-end pipeline test: staging, batch upload, job creation and
//! polling against an in-memory fake backend wired into every seam.

use async_trait::async_trait;
use sentiment_ingest::Logger;
use sentiment_ingest::api::{IngestApi, SessionStore, UploadMetadata, UploadTicket};
use sentiment_ingest::error::Result;
use sentiment_ingest::poller::{JobPoller, JobStatus, JobStatusReport, JobStatusSource};
use sentiment_ingest::staging::{FileStatus, IncomingFile, StagingRegistry};
use sentiment_ingest::transport::{RawResponse, RetryTransport, TransferExecutor, TransferObserver};
use sentiment_ingest::upload::UploadCoordinator;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeBackend {
    /// upload_url -> backend file id handed out at registration time
    tickets: Mutex<HashMap<String, String>>,
    next_file: AtomicUsize,
    status_script: Mutex<VecDeque<JobStatusReport>>,
    status_calls: AtomicUsize,
}

impl FakeBackend {
    fn new(status_script: Vec<JobStatusReport>) -> Arc<Self> {
        Arc::new(Self {
            tickets: Mutex::new(HashMap::new()),
            next_file: AtomicUsize::new(0),
            status_script: Mutex::new(status_script.into()),
            status_calls: AtomicUsize::new(0),
        })
    }

    fn create_job(&self, file_ids: &[String]) -> String {
        assert!(!file_ids.is_empty());
        "job-1".to_string()
    }
}

#[async_trait]
impl IngestApi for FakeBackend {
    async fn register_upload(&self, meta: &UploadMetadata) -> Result<UploadTicket> {
        let n = self.next_file.fetch_add(1, Ordering::SeqCst);
        let upload_url = format!("http://backend/ingest/binary/{}", meta.filename);
        self.tickets
            .lock()
            .unwrap()
            .insert(upload_url.clone(), format!("file-{}", n));
        Ok(UploadTicket { upload_url })
    }
}

#[async_trait]
impl TransferExecutor for FakeBackend {
    async fn put(
        &self,
        url: &str,
        _headers: &[(String, String)],
        payload: &[u8],
        observer: Arc<dyn TransferObserver>,
    ) -> Result<RawResponse> {
        assert!(!payload.is_empty());
        observer.on_progress(100.0);
        let id = self
            .tickets
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .expect("PUT to an unregistered upload URL");
        Ok(RawResponse {
            status: 200,
            body: format!(r#"{{"id":"{}"}}"#, id),
        })
    }
}

#[async_trait]
impl JobStatusSource for FakeBackend {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport> {
        assert_eq!(job_id, "job-1");
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .status_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JobStatusReport {
                status: JobStatus::Pending,
                progress: 0,
                payload: None,
                error: None,
            }))
    }
}

fn report(status: JobStatus, progress: u8, payload: Option<serde_json::Value>) -> JobStatusReport {
    JobStatusReport {
        status,
        progress,
        payload,
        error: None,
    }
}

#[tokio::test]
async fn test_full_pipeline_staging_to_completed_job() {
    let payload = serde_json::json!({"layout_strategy": "SNAPSHOT_PIVOT", "meta": {"rows": 420}});
    let backend = FakeBackend::new(vec![
        report(JobStatus::Pending, 0, None),
        report(JobStatus::Processing, 45, None),
        report(JobStatus::Completed, 100, Some(payload.clone())),
    ]);
    let logger = Logger::new_quiet();

    // Stage two files.
    let registry = StagingRegistry::new(logger.clone());
    registry.add_files(vec![
        IncomingFile {
            name: "a.csv".to_string(),
            mime_type: "text/csv".to_string(),
            content: vec![b'a'; 10 * 1024],
        },
        IncomingFile {
            name: "b.json".to_string(),
            mime_type: "application/json".to_string(),
            content: vec![b'b'; 5 * 1024],
        },
    ]);

    // Upload the batch through the real coordinator and retry transport.
    let transport = RetryTransport::new(backend.clone(), logger.clone())
        .with_policy(3, Duration::from_millis(1));
    let coordinator = Arc::new(UploadCoordinator::new(
        backend.clone(),
        transport,
        SessionStore::new(),
    ));
    registry.upload_batch(coordinator).await;

    let files = registry.snapshot();
    assert!(files.iter().all(|f| f.status == FileStatus::Complete));
    let ids = registry.backend_ids();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    // Create and track the job.
    let job_id = backend.create_job(&ids);
    assert_eq!(job_id, "job-1");

    let poller = JobPoller::new(backend.clone(), logger)
        .with_timing(Duration::from_millis(10), Duration::from_secs(2));
    let mut rx = poller.track(&job_id);
    rx.wait_for(|job| job.status.is_terminal()).await.unwrap();

    let job = poller.snapshot();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.payload, Some(payload));

    // Polling stopped at the terminal status.
    let calls = backend.status_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.status_calls.load(Ordering::SeqCst), calls);
}
