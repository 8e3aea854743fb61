//! Background job tracking
//!
//! [`JobPoller`] owns the state machine for one server-side analysis job:
//! it polls the status endpoint on a fixed cadence, enforces an independent
//! wall-clock timeout, and publishes every state change to subscribers over a
//! watch channel. Terminal states stop the loop permanently; `reset` or a new
//! `track` call cancels the previous loop before anything else runs.

use crate::error::{IngestError, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};

/// Job lifecycle states as reported by the backend, plus the two
/// client-local states `Idle` and `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Idle,
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    /// Terminal states admit no further transition without an explicit reset.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }
}

/// One status-endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusReport {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Issues one status query for a job id. Implemented by the API client;
/// tests script it directly.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusReport>;
}

/// Client-side view of the tracked analysis job.
#[derive(Debug, Clone, Default)]
pub struct AnalysisJob {
    pub job_id: Option<String>,
    pub status: JobStatus,
    /// Server-authoritative; 0-99 while running, 100 on completion.
    pub progress: u8,
    /// Present iff `status == Completed`.
    pub payload: Option<Value>,
    /// Present iff `status` is `Failed` or `Timeout`.
    pub error: Option<String>,
}

pub struct JobPoller {
    source: Arc<dyn JobStatusSource>,
    poll_interval: Duration,
    poll_timeout: Duration,
    logger: Logger,
    state_tx: Arc<watch::Sender<AnalysisJob>>,
    state_rx: watch::Receiver<AnalysisJob>,
    /// Bumped on every `track`/`reset`; an in-flight loop compares its own
    /// generation before publishing so a stale tick can never mutate state
    /// that belongs to a newer job.
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobPoller {
    pub fn new(source: Arc<dyn JobStatusSource>, logger: Logger) -> Self {
        let (state_tx, state_rx) = watch::channel(AnalysisJob::default());
        Self {
            source,
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_millis(crate::config::DEFAULT_POLL_TIMEOUT_MS),
            logger,
            state_tx: Arc::new(state_tx),
            state_rx,
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn with_timing(mut self, poll_interval: Duration, poll_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.poll_timeout = poll_timeout;
        self
    }

    /// Current job snapshot.
    pub fn snapshot(&self) -> AnalysisJob {
        self.state_rx.borrow().clone()
    }

    /// New subscription to job state changes.
    pub fn subscribe(&self) -> watch::Receiver<AnalysisJob> {
        self.state_rx.clone()
    }

    /// Starts tracking `job_id`, cancelling any previously active loop
    /// first. The returned receiver observes every subsequent state change.
    pub fn track(&self, job_id: &str) -> watch::Receiver<AnalysisJob> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_task();

        let _ = self.state_tx.send(AnalysisJob {
            job_id: Some(job_id.to_string()),
            status: JobStatus::Pending,
            ..AnalysisJob::default()
        });

        let handle = tokio::spawn(poll_loop(PollLoop {
            source: self.source.clone(),
            state_tx: self.state_tx.clone(),
            current_generation: self.generation.clone(),
            generation,
            job_id: job_id.to_string(),
            poll_interval: self.poll_interval,
            poll_timeout: self.poll_timeout,
            logger: self.logger.clone(),
        }));
        if let Ok(mut guard) = self.task.lock() {
            *guard = Some(handle);
        }

        self.state_rx.clone()
    }

    /// Cancels any active loop and returns the job to `Idle`.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_task();
        let _ = self.state_tx.send(AnalysisJob::default());
    }

    fn cancel_task(&self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.cancel_task();
    }
}

struct PollLoop {
    source: Arc<dyn JobStatusSource>,
    state_tx: Arc<watch::Sender<AnalysisJob>>,
    current_generation: Arc<AtomicU64>,
    generation: u64,
    job_id: String,
    poll_interval: Duration,
    poll_timeout: Duration,
    logger: Logger,
}

impl PollLoop {
    /// Publishes a snapshot unless a newer `track`/`reset` superseded this
    /// loop in the meantime.
    fn publish(&self, job: AnalysisJob) {
        if self.current_generation.load(Ordering::SeqCst) == self.generation {
            let _ = self.state_tx.send(job);
        }
    }

    fn running_snapshot(&self, status: JobStatus, progress: u8) -> AnalysisJob {
        AnalysisJob {
            job_id: Some(self.job_id.clone()),
            status,
            progress,
            payload: None,
            error: None,
        }
    }
}

async fn poll_loop(ctx: PollLoop) {
    let deadline = Instant::now() + ctx.poll_timeout;
    // First tick fires immediately; the backend answers fresh job ids right
    // away and the UI wants an early PROCESSING signal.
    let mut ticker = interval_at(Instant::now(), ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => {
                ctx.publish(AnalysisJob {
                    job_id: Some(ctx.job_id.clone()),
                    status: JobStatus::Timeout,
                    error: Some("Operation timed out. Please retry.".to_string()),
                    ..AnalysisJob::default()
                });
                return;
            }
            _ = ticker.tick() => {}
        }

        // Ticks are serialized: the next tick cannot start until this fetch
        // settles, so overlapping in-flight queries are impossible. The
        // wall-clock deadline still wins over a hung request.
        let result = tokio::select! {
            biased;
            _ = sleep_until(deadline) => {
                ctx.publish(AnalysisJob {
                    job_id: Some(ctx.job_id.clone()),
                    status: JobStatus::Timeout,
                    error: Some("Operation timed out. Please retry.".to_string()),
                    ..AnalysisJob::default()
                });
                return;
            }
            result = ctx.source.fetch_status(&ctx.job_id) => result,
        };

        match result {
            Ok(report) => match report.status {
                JobStatus::Completed => {
                    ctx.publish(AnalysisJob {
                        job_id: Some(ctx.job_id.clone()),
                        status: JobStatus::Completed,
                        progress: 100,
                        payload: report.payload,
                        error: None,
                    });
                    return;
                }
                JobStatus::Failed => {
                    ctx.publish(AnalysisJob {
                        job_id: Some(ctx.job_id.clone()),
                        status: JobStatus::Failed,
                        progress: report.progress,
                        payload: None,
                        error: Some(report.error.unwrap_or_else(|| "Job failed".to_string())),
                    });
                    return;
                }
                // Idle and Timeout are client-local; a server echoing them
                // sent a malformed report.
                status @ (JobStatus::Idle | JobStatus::Timeout) => {
                    ctx.logger.warning(&format!(
                        "Ignoring malformed status report for {}: {:?}",
                        ctx.job_id, status
                    ));
                }
                status => {
                    ctx.publish(ctx.running_snapshot(status, report.progress));
                }
            },
            // The server no longer knows the job; nothing to keep polling.
            Err(err @ IngestError::JobVanished(_)) => {
                ctx.publish(AnalysisJob {
                    job_id: Some(ctx.job_id.clone()),
                    status: JobStatus::Failed,
                    error: Some(err.to_string()),
                    ..AnalysisJob::default()
                });
                return;
            }
            // Transient poll failures never abort tracking; only the
            // timeout or a definitive terminal status does.
            Err(err) => {
                ctx.logger
                    .warning(&format!("Poll tick for {} failed: {}", ctx.job_id, err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedSource {
        script: Mutex<VecDeque<Result<JobStatusReport>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<JobStatusReport>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStatusSource for ScriptedSource {
        async fn fetch_status(&self, _job_id: &str) -> Result<JobStatusReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Exhausted scripts keep reporting a running job.
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(report(
                JobStatus::Pending,
                0,
                None,
            )))
        }
    }

    fn report(status: JobStatus, progress: u8, payload: Option<Value>) -> JobStatusReport {
        JobStatusReport {
            status,
            progress,
            payload,
            error: None,
        }
    }

    fn poller(source: Arc<ScriptedSource>) -> JobPoller {
        JobPoller::new(source, Logger::new_quiet())
            .with_timing(Duration::from_millis(10), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_track_transitions_idle_to_pending() {
        let source = ScriptedSource::new(vec![]);
        let poller = poller(source);
        assert_eq!(poller.snapshot().status, JobStatus::Idle);

        let rx = poller.track("abc");
        let job = rx.borrow().clone();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_completed_stores_payload_and_stops_polling() {
        let source = ScriptedSource::new(vec![
            Ok(report(JobStatus::Pending, 0, None)),
            Ok(report(
                JobStatus::Completed,
                100,
                Some(serde_json::json!({"x": 1})),
            )),
        ]);
        let poller = poller(source.clone());

        let mut rx = poller.track("abc");
        rx.wait_for(|job| job.status.is_terminal()).await.unwrap();

        let job = poller.snapshot();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.payload, Some(serde_json::json!({"x": 1})));

        let calls_at_terminal = source.calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(source.calls(), calls_at_terminal);
    }

    #[tokio::test]
    async fn test_failed_report_surfaces_error() {
        let source = ScriptedSource::new(vec![Ok(JobStatusReport {
            status: JobStatus::Failed,
            progress: 30,
            payload: None,
            error: Some("tokenizer exploded".to_string()),
        })]);
        let poller = poller(source);

        let mut rx = poller.track("abc");
        rx.wait_for(|job| job.status.is_terminal()).await.unwrap();

        let job = poller.snapshot();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("tokenizer exploded"));
    }

    #[tokio::test]
    async fn test_timeout_when_no_terminal_response() {
        let source = ScriptedSource::new(vec![]);
        let poller = JobPoller::new(source.clone(), Logger::new_quiet())
            .with_timing(Duration::from_millis(10), Duration::from_millis(80));

        let mut rx = poller.track("slow-job");
        rx.wait_for(|job| job.status.is_terminal()).await.unwrap();

        assert_eq!(poller.snapshot().status, JobStatus::Timeout);
        assert!(poller.snapshot().error.is_some());

        let calls_at_timeout = source.calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(source.calls(), calls_at_timeout);
    }

    #[tokio::test]
    async fn test_vanished_job_stops_with_distinct_error() {
        let source = ScriptedSource::new(vec![Err(IngestError::JobVanished("gone-1".into()))]);
        let poller = poller(source.clone());

        let mut rx = poller.track("gone-1");
        rx.wait_for(|job| job.status.is_terminal()).await.unwrap();

        let job = poller.snapshot();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("not found on server"));

        let calls = source.calls();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(source.calls(), calls);
    }

    #[tokio::test]
    async fn test_transient_poll_errors_do_not_abort_tracking() {
        let source = ScriptedSource::new(vec![
            Err(IngestError::Api("Status query failed with HTTP 502".into())),
            Ok(report(JobStatus::Processing, 45, None)),
            Ok(report(JobStatus::Completed, 100, Some(serde_json::json!({})))),
        ]);
        let poller = poller(source);

        let mut rx = poller.track("abc");
        rx.wait_for(|job| job.status.is_terminal()).await.unwrap();

        assert_eq!(poller.snapshot().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_client_local_statuses_in_reports_are_ignored() {
        let source = ScriptedSource::new(vec![
            Ok(report(JobStatus::Idle, 0, None)),
            Ok(report(JobStatus::Timeout, 0, None)),
            Ok(report(JobStatus::Completed, 100, None)),
        ]);
        let poller = poller(source);

        let mut rx = poller.track("abc");
        // The malformed reports must never surface as published states.
        let terminal = rx
            .wait_for(|job| job.status != JobStatus::Pending)
            .await
            .unwrap()
            .clone();
        assert_eq!(terminal.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle_and_stops_polling() {
        let source = ScriptedSource::new(vec![]);
        let poller = poller(source.clone());

        poller.track("abc");
        tokio::time::sleep(Duration::from_millis(25)).await;
        poller.reset();

        assert_eq!(poller.snapshot().status, JobStatus::Idle);
        assert_eq!(poller.snapshot().job_id, None);

        let calls = source.calls();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(source.calls(), calls);
    }

    #[tokio::test]
    async fn test_new_track_supersedes_previous_loop() {
        let source = ScriptedSource::new(vec![]);
        let poller = poller(source);

        poller.track("first");
        let rx = poller.track("second");

        assert_eq!(rx.borrow().job_id.as_deref(), Some("second"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        // The superseded loop must not have overwritten the newer job id.
        assert_eq!(poller.snapshot().job_id.as_deref(), Some("second"));
    }
}
