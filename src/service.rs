//! The composition root and public facade.
//!
//! [`DocumentService`] wires the extractor, embedding provider, vector
//! store, status tracker, ingestion pipeline and job queue together, and
//! exposes the operations an HTTP layer (or test) calls:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`enqueue_ingestion`](DocumentService::enqueue_ingestion) | Register upload + queue background ingestion |
//! | [`get_job_status`](DocumentService::get_job_status) | Poll one job |
//! | [`get_document_status`](DocumentService::get_document_status) | Poll one document |
//! | [`query`](DocumentService::query) | Retrieve relevant chunks for a question |
//! | [`delete_document`](DocumentService::delete_document) | Remove a document's vectors and status |
//! | [`document_stats`](DocumentService::document_stats) | Per-document store stats |
//! | [`queue_stats`](DocumentService::queue_stats) | Queue occupancy |
//!
//! Retrieval is gated on the tracker: querying a specific document that
//! has not completed ingestion is a typed [`PipelineError::DocumentNotReady`]
//! rather than a silent empty result, so callers can distinguish "still
//! processing" from "nothing matched".

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{PipelineError, Result};
use crate::extract::DocumentExtractor;
use crate::ingest::{IngestPipeline, IngestRequest};
use crate::queue::{Job, JobQueue, QueueStats};
use crate::store::{DocumentStats, QueryHit, VectorStore};
use crate::tracker::{DocumentStatus, StatusTracker};

/// Result of one retrieval query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub hits: Vec<QueryHit>,
    /// True when the query embedding came from the local hash fallback;
    /// hits should be presented with reduced confidence.
    pub pseudo_embeddings: bool,
}

pub struct DocumentService {
    config: Config,
    tracker: Arc<StatusTracker>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    queue: Arc<JobQueue>,
}

impl DocumentService {
    pub fn new(
        config: Config,
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let tracker = Arc::new(StatusTracker::new(Duration::from_secs(
            config.tracker.status_ttl_secs,
        )));
        let pipeline = Arc::new(IngestPipeline::new(
            extractor,
            embedder.clone(),
            store.clone(),
            tracker.clone(),
            &config,
        ));
        let queue = Arc::new(JobQueue::new(
            pipeline,
            config.queue.max_concurrent,
            Duration::from_secs(config.queue.retention_secs),
        ));
        Self {
            config,
            tracker,
            store,
            embedder,
            queue,
        }
    }

    /// Record an upload before its ingestion job exists, so status polls
    /// between upload and enqueue resolve. Idempotent per document ID.
    pub fn register_upload(&self, document_id: &str, file_meta: serde_json::Value) {
        self.tracker.register(document_id, file_meta);
    }

    /// Register the upload (if not already registered) and queue its
    /// ingestion. Returns the job ID immediately; the work happens in the
    /// background.
    pub fn enqueue_ingestion(
        &self,
        document_id: &str,
        source_path: impl Into<PathBuf>,
        file_meta: serde_json::Value,
    ) -> String {
        self.tracker.register(document_id, file_meta.clone());
        let job_id = self.queue.add_job(IngestRequest {
            document_id: document_id.to_string(),
            source_path: source_path.into(),
            file_meta,
        });
        info!(document_id, job_id, "ingestion enqueued");
        job_id
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<Job> {
        self.queue.get_job(job_id)
    }

    pub fn get_document_status(&self, document_id: &str) -> Result<DocumentStatus> {
        self.tracker.status(document_id)
    }

    /// True iff the document finished ingestion and can back a chat.
    pub fn is_ready_for_chat(&self, document_id: &str) -> bool {
        self.tracker.is_ready_for_chat(document_id)
    }

    /// Embed `query_text` and return the most similar stored chunks.
    ///
    /// With a `document_id` filter, the document must exist and be fully
    /// ingested; otherwise the search spans all stored documents.
    pub async fn query(
        &self,
        query_text: &str,
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<QueryResponse> {
        if let Some(id) = document_id {
            let status = self.tracker.status(id)?;
            if !self.tracker.is_ready_for_chat(id) {
                return Err(PipelineError::DocumentNotReady {
                    document_id: id.to_string(),
                    status: status.stage.as_str().to_string(),
                });
            }
        }

        let batch = embed_query(self.embedder.as_ref(), query_text).await?;
        let hits = self
            .store
            .query(&batch.vectors[0], document_id, limit)
            .await?;
        debug!(
            document_id = document_id.unwrap_or("*"),
            hits = hits.len(),
            "query served"
        );
        Ok(QueryResponse {
            hits,
            pseudo_embeddings: batch.pseudo,
        })
    }

    /// Remove a document's vectors and its status record. Unknown IDs are
    /// [`PipelineError::DocumentNotFound`].
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.tracker.status(document_id)?;
        let removed = self.store.delete_document(document_id).await?;
        self.tracker.remove(document_id);
        info!(document_id, removed, "document deleted");
        Ok(removed)
    }

    pub async fn document_stats(&self, document_id: &str) -> Result<DocumentStats> {
        self.store.stats(document_id).await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.get_stats()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// One pass of the periodic cleanup: expired terminal jobs, expired
    /// document status records, and the stored vectors of every document
    /// whose status record just expired. Vectors must never outlive the
    /// last handle to them, so the status sweep and the store delete
    /// always travel together. Returns `(jobs_removed, documents_removed)`.
    pub async fn run_maintenance_sweep(&self) -> (usize, usize) {
        Self::sweep_once(&self.queue, &self.tracker, self.store.as_ref()).await
    }

    async fn sweep_once(
        queue: &JobQueue,
        tracker: &StatusTracker,
        store: &dyn VectorStore,
    ) -> (usize, usize) {
        let jobs = queue.sweep();
        let expired = tracker.sweep_expired();
        for document_id in &expired {
            if let Err(e) = store.delete_document(document_id).await {
                warn!(document_id, error = %e, "failed to delete vectors of expired document");
            }
        }
        if jobs > 0 || !expired.is_empty() {
            debug!(jobs, documents = expired.len(), "maintenance sweep");
        }
        (jobs, expired.len())
    }

    /// Spawn the periodic maintenance sweep. Runs until the task is
    /// aborted or the runtime shuts down.
    pub fn start_maintenance(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let tracker = self.tracker.clone();
        let store = self.store.clone();
        let interval = Duration::from_secs(self.config.queue.gc_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                Self::sweep_once(&queue, &tracker, store.as_ref()).await;
            }
        })
    }
}
