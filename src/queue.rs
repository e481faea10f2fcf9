//! Bounded-concurrency background job queue.
//!
//! Wraps "ingest one document" as a stateful job with progress reporting
//! so the HTTP-facing layer never blocks on ingestion. At most
//! `max_concurrent` jobs run at once; the rest wait in FIFO order.
//! Promotion happens in exactly two places — when a job is enqueued and
//! when a running job terminates — there is no polling loop.
//!
//! State machine per job: `queued -> processing -> {completed | failed}`.
//! Terminal states are immutable. A failed job is never retried; the
//! caller re-uploads, which creates a brand-new job under a fresh
//! document ID.
//!
//! Terminal jobs are garbage-collected after a retention window via
//! [`JobQueue::sweep`], driven by the service's maintenance task.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::ingest::{IngestRequest, IngestSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Snapshot of one background job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub document_id: String,
    pub status: JobStatus,
    /// 0-100, monotonically non-decreasing over the job's lifetime.
    pub progress: u8,
    pub status_message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<IngestSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub capacity: usize,
}

/// Executes the work behind a job. Implemented by the ingestion pipeline;
/// tests substitute stubs.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, request: IngestRequest, progress: JobProgress) -> Result<IngestSummary>;
}

/// Handle a running job uses to report progress. Reports against a
/// terminal job are ignored; progress never moves backward.
#[derive(Clone)]
pub struct JobProgress {
    inner: Arc<Mutex<QueueInner>>,
    job_id: String,
}

impl JobProgress {
    /// Handle attached to no job; reports go nowhere. For running the
    /// pipeline outside the queue.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                jobs: HashMap::new(),
                pending: VecDeque::new(),
                processing: 0,
            })),
            job_id: String::new(),
        }
    }

    pub fn report(&self, progress: u8, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.jobs.get_mut(&self.job_id) {
            if entry.job.status == JobStatus::Processing {
                entry.job.progress = entry.job.progress.max(progress.min(100));
                entry.job.status_message = message.to_string();
            }
        }
    }
}

struct JobEntry {
    job: Job,
    /// Present while the job is queued; taken at promotion.
    request: Option<IngestRequest>,
}

struct QueueInner {
    jobs: HashMap<String, JobEntry>,
    pending: VecDeque<String>,
    processing: usize,
}

pub struct JobQueue {
    inner: Arc<Mutex<QueueInner>>,
    runner: Arc<dyn JobRunner>,
    max_concurrent: usize,
    retention: Duration,
}

impl JobQueue {
    pub fn new(runner: Arc<dyn JobRunner>, max_concurrent: usize, retention: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                jobs: HashMap::new(),
                pending: VecDeque::new(),
                processing: 0,
            })),
            runner,
            max_concurrent: max_concurrent.max(1),
            retention,
        }
    }

    /// Enqueue a job and attempt promotion. Always returns immediately
    /// with the new job's ID.
    pub fn add_job(&self, request: IngestRequest) -> String {
        let job_id = Uuid::new_v4().to_string();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.jobs.insert(
                job_id.clone(),
                JobEntry {
                    job: Job {
                        id: job_id.clone(),
                        document_id: request.document_id.clone(),
                        status: JobStatus::Queued,
                        progress: 0,
                        status_message: "queued".to_string(),
                        created_at: Utc::now(),
                        started_at: None,
                        completed_at: None,
                        result: None,
                        error: None,
                    },
                    request: Some(request),
                },
            );
            inner.pending.push_back(job_id.clone());
        }
        info!(job_id, "job enqueued");
        Self::promote(&self.inner, &self.runner, self.max_concurrent);
        job_id
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .get(job_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    pub fn get_stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = QueueStats {
            total: inner.jobs.len(),
            queued: 0,
            processing: 0,
            completed: 0,
            failed: 0,
            capacity: self.max_concurrent,
        };
        for entry in inner.jobs.values() {
            match entry.job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Remove terminal jobs whose completion is older than the retention
    /// window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut inner = self.inner.lock().unwrap();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, e| {
            !(e.job.status.is_terminal() && e.job.completed_at.map_or(false, |t| t < cutoff))
        });
        before - inner.jobs.len()
    }

    /// Promote queued jobs into free concurrency slots. The only
    /// scheduling trigger: called on enqueue and on job termination.
    fn promote(inner_arc: &Arc<Mutex<QueueInner>>, runner: &Arc<dyn JobRunner>, max_concurrent: usize) {
        loop {
            let (job_id, request) = {
                let mut inner = inner_arc.lock().unwrap();
                if inner.processing >= max_concurrent {
                    return;
                }
                let Some(job_id) = inner.pending.pop_front() else {
                    return;
                };
                let Some(entry) = inner.jobs.get_mut(&job_id) else {
                    continue;
                };
                let Some(request) = entry.request.take() else {
                    continue;
                };
                entry.job.status = JobStatus::Processing;
                entry.job.started_at = Some(Utc::now());
                entry.job.status_message = "processing".to_string();
                inner.processing += 1;
                (job_id, request)
            };

            let inner_clone = Arc::clone(inner_arc);
            let runner_clone = Arc::clone(runner);
            tokio::spawn(async move {
                let progress = JobProgress {
                    inner: Arc::clone(&inner_clone),
                    job_id: job_id.clone(),
                };
                let outcome = runner_clone.run(request, progress).await;
                Self::finalize(&inner_clone, &job_id, outcome);
                Self::promote(&inner_clone, &runner_clone, max_concurrent);
            });
        }
    }

    fn finalize(
        inner_arc: &Arc<Mutex<QueueInner>>,
        job_id: &str,
        outcome: Result<IngestSummary>,
    ) {
        let mut inner = inner_arc.lock().unwrap();
        inner.processing = inner.processing.saturating_sub(1);
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            return;
        };
        // Terminal states are immutable; only a processing job finalizes.
        if entry.job.status != JobStatus::Processing {
            return;
        }
        entry.job.completed_at = Some(Utc::now());
        match outcome {
            Ok(summary) => {
                entry.job.status = JobStatus::Completed;
                entry.job.progress = 100;
                entry.job.status_message = "completed".to_string();
                entry.job.result = Some(summary);
                info!(job_id, "job completed");
            }
            Err(e) => {
                entry.job.status = JobStatus::Failed;
                entry.job.status_message = "failed".to_string();
                entry.job.error = Some(e.to_string());
                warn!(job_id, error = %e, "job failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(doc: &str) -> IngestRequest {
        IngestRequest {
            document_id: doc.to_string(),
            source_path: PathBuf::from("/dev/null"),
            file_meta: serde_json::Value::Null,
        }
    }

    fn summary(doc: &str) -> IngestSummary {
        IngestSummary {
            document_id: doc.to_string(),
            chunk_count: 1,
            num_pages: 1,
            embedding_provider: "test".to_string(),
            pseudo_embeddings: false,
            elapsed_ms: 0,
        }
    }

    /// Sleeps briefly and tracks peak concurrency.
    struct SlowRunner {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for SlowRunner {
        async fn run(&self, request: IngestRequest, progress: JobProgress) -> Result<IngestSummary> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            progress.report(50, "working");
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(summary(&request.document_id))
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl JobRunner for FailingRunner {
        async fn run(&self, _request: IngestRequest, _progress: JobProgress) -> Result<IngestSummary> {
            Err(PipelineError::ExtractionFailed("unreadable".to_string()))
        }
    }

    async fn wait_until<F: Fn(&JobQueue) -> bool>(queue: &JobQueue, pred: F) {
        for _ in 0..200 {
            if pred(queue) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_never_exceeds_cap() {
        let runner = Arc::new(SlowRunner {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = JobQueue::new(runner.clone(), 2, Duration::from_secs(3600));

        for i in 0..5 {
            queue.add_job(request(&format!("doc{}", i)));
        }
        assert!(queue.get_stats().processing <= 2);

        wait_until(&queue, |q| q.get_stats().completed == 5).await;
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.get_stats().queued, 0);
    }

    #[tokio::test]
    async fn job_lifecycle_and_result() {
        let runner = Arc::new(SlowRunner {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = JobQueue::new(runner, 2, Duration::from_secs(3600));

        let job_id = queue.add_job(request("doc1"));
        let job = queue.get_job(&job_id).unwrap();
        assert_eq!(job.document_id, "doc1");
        assert!(job.completed_at.is_none());

        wait_until(&queue, |q| {
            q.get_job(&job_id).unwrap().status == JobStatus::Completed
        })
        .await;

        let job = queue.get_job(&job_id).unwrap();
        assert_eq!(job.progress, 100);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert_eq!(job.result.as_ref().unwrap().document_id, "doc1");
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn failed_job_records_error_and_is_terminal() {
        let queue = JobQueue::new(Arc::new(FailingRunner), 2, Duration::from_secs(3600));
        let job_id = queue.add_job(request("doc1"));

        wait_until(&queue, |q| {
            q.get_job(&job_id).unwrap().status == JobStatus::Failed
        })
        .await;

        let job = queue.get_job(&job_id).unwrap();
        assert!(job.error.as_deref().unwrap().contains("unreadable"));
        assert!(job.result.is_none());
        assert_eq!(queue.get_stats().failed, 1);
    }

    #[tokio::test]
    async fn late_progress_reports_ignored_after_terminal() {
        struct HandleStash {
            stash: Mutex<Option<JobProgress>>,
        }

        #[async_trait]
        impl JobRunner for HandleStash {
            async fn run(&self, request: IngestRequest, progress: JobProgress) -> Result<IngestSummary> {
                *self.stash.lock().unwrap() = Some(progress);
                Ok(summary(&request.document_id))
            }
        }

        let runner = Arc::new(HandleStash {
            stash: Mutex::new(None),
        });
        let queue = JobQueue::new(runner.clone(), 1, Duration::from_secs(3600));
        let job_id = queue.add_job(request("doc1"));

        wait_until(&queue, |q| {
            q.get_job(&job_id).unwrap().status == JobStatus::Completed
        })
        .await;

        let handle = runner.stash.lock().unwrap().take().unwrap();
        handle.report(10, "late");
        let job = queue.get_job(&job_id).unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.status_message, "completed");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let queue = JobQueue::new(Arc::new(FailingRunner), 2, Duration::from_secs(3600));
        assert!(matches!(
            queue.get_job("missing").unwrap_err(),
            PipelineError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn sweep_removes_expired_terminal_jobs() {
        let runner = Arc::new(SlowRunner {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = JobQueue::new(runner, 2, Duration::from_secs(0));
        let job_id = queue.add_job(request("doc1"));

        wait_until(&queue, |q| q.get_stats().completed == 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(queue.sweep(), 1);
        assert!(queue.get_job(&job_id).is_err());
        assert_eq!(queue.get_stats().total, 0);
    }
}
