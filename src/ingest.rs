//! The ingestion pipeline: extract, chunk, embed, store.
//!
//! # Phases
//!
//! | Phase | Progress | Tracker stage |
//! |-------|----------|---------------|
//! | extract text | 0 → 10 | `processing` |
//! | chunk + embed | 10 → 70 | `processing` |
//! | store vectors | 70 → 100 | `vectorizing` → `completed` |
//!
//! Progress is reported to both the owning job and the document status
//! tracker at the same checkpoints. The vector store is written exactly
//! once, after every embedding batch has succeeded, so a failure at any
//! phase leaves the store untouched for that document.
//!
//! Failures are not retried at this level. The embedding provider retries
//! transient upstream errors internally; anything that escapes it fails
//! the job, marks the document `error`, and waits for the user to
//! re-upload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{PipelineError, Result};
use crate::extract::DocumentExtractor;
use crate::queue::{JobProgress, JobRunner};
use crate::store::VectorStore;
use crate::tracker::{DocumentStage, StatusTracker};

/// Everything the pipeline needs to ingest one uploaded document.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub document_id: String,
    pub source_path: PathBuf,
    /// Upload-time metadata (filename, size, uploader), stored alongside
    /// every record of the document.
    pub file_meta: serde_json::Value,
}

/// Outcome of a successful ingestion, kept on the completed job.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub chunk_count: usize,
    pub num_pages: i64,
    pub embedding_provider: String,
    pub pseudo_embeddings: bool,
    pub elapsed_ms: u64,
}

/// Extraction gets longer to run on bigger files, one extra base interval
/// per 10 MiB, capped at 5x.
fn extract_timeout(base: Duration, file_size: u64) -> Duration {
    let scale = (file_size / (10 * 1024 * 1024)).min(4) as u32 + 1;
    base * scale
}

pub struct IngestPipeline {
    extractor: Arc<dyn DocumentExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    tracker: Arc<StatusTracker>,
    target_size: usize,
    overlap: usize,
    batch_size: usize,
    embed_timeout: Duration,
    extract_timeout_base: Duration,
}

impl IngestPipeline {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        tracker: Arc<StatusTracker>,
        config: &Config,
    ) -> Self {
        Self {
            extractor,
            embedder,
            store,
            tracker,
            target_size: config.chunking.target_size,
            overlap: config.chunking.overlap,
            batch_size: config.embedding.batch_size.max(1),
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            extract_timeout_base: Duration::from_secs(config.queue.extract_timeout_secs),
        }
    }

    async fn run_inner(
        &self,
        request: &IngestRequest,
        progress: &JobProgress,
    ) -> Result<IngestSummary> {
        let started = Instant::now();
        let document_id = request.document_id.as_str();

        self.tracker
            .set_stage(document_id, DocumentStage::Processing, 0)?;
        progress.report(0, "extracting text");

        let file_size = tokio::fs::metadata(&request.source_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let timeout = extract_timeout(self.extract_timeout_base, file_size);
        let extracted = tokio::time::timeout(timeout, self.extractor.extract(&request.source_path))
            .await
            .map_err(|_| {
                PipelineError::ExtractionFailed(format!(
                    "extraction timed out after {}s",
                    timeout.as_secs()
                ))
            })??;

        self.tracker.update_progress(document_id, 10)?;
        progress.report(10, "chunking text");

        let chunks = chunk_text(
            &extracted.text,
            self.target_size,
            self.overlap,
            extracted.num_pages,
        )?;
        if chunks.is_empty() {
            return Err(PipelineError::ExtractionFailed(
                "document produced no extractable text".to_string(),
            ));
        }
        info!(
            document_id,
            chunks = chunks.len(),
            pages = extracted.num_pages,
            "document chunked"
        );

        // Embed in batches; the store write happens only after all of
        // them succeed.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut provider_name: Option<String> = None;
        let mut pseudo = false;
        for batch_texts in texts.chunks(self.batch_size) {
            let batch = tokio::time::timeout(self.embed_timeout, self.embedder.embed(batch_texts))
                .await
                .map_err(|_| {
                    PipelineError::EmbeddingFailed(format!(
                        "embedding timed out after {}s",
                        self.embed_timeout.as_secs()
                    ))
                })??;

            pseudo |= batch.pseudo;
            provider_name = Some(match provider_name {
                Some(prev) if prev != batch.provider => "mixed".to_string(),
                _ => batch.provider,
            });
            embeddings.extend(batch.vectors);

            // 10 -> 70 proportional to embedded chunks
            let pct = 10 + (60 * embeddings.len() / texts.len()) as u8;
            self.tracker.update_progress(document_id, pct)?;
            progress.report(pct, "generating embeddings");
        }
        let provider_name = provider_name.unwrap_or_else(|| self.embedder.name().to_string());

        self.tracker
            .set_stage(document_id, DocumentStage::Vectorizing, 70)?;
        progress.report(70, "storing vectors");

        let mut doc_meta = if request.file_meta.is_object() {
            request.file_meta.clone()
        } else {
            serde_json::json!({})
        };
        if let Some(map) = doc_meta.as_object_mut() {
            map.insert("total_pages".to_string(), extracted.num_pages.into());
            map.insert(
                "embedding_provider".to_string(),
                provider_name.clone().into(),
            );
            map.insert("pseudo_embeddings".to_string(), pseudo.into());
            if let Some(extractor_meta) = extracted.metadata.as_object() {
                for (k, v) in extractor_meta {
                    map.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }

        let created = self
            .store
            .add(document_id, &chunks, &embeddings, &doc_meta)
            .await?;

        self.tracker.mark_completed(document_id)?;
        progress.report(100, "completed");

        let summary = IngestSummary {
            document_id: document_id.to_string(),
            chunk_count: created,
            num_pages: extracted.num_pages,
            embedding_provider: provider_name,
            pseudo_embeddings: pseudo,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            document_id,
            chunks = summary.chunk_count,
            provider = %summary.embedding_provider,
            elapsed_ms = summary.elapsed_ms,
            "document ingested"
        );
        Ok(summary)
    }
}

#[async_trait]
impl JobRunner for IngestPipeline {
    async fn run(&self, request: IngestRequest, progress: JobProgress) -> Result<IngestSummary> {
        match self.run_inner(&request, &progress).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!(document_id = %request.document_id, error = %e, "ingestion failed");
                if let Err(track_err) = self
                    .tracker
                    .mark_error(&request.document_id, &e.to_string())
                {
                    warn!(
                        document_id = %request.document_id,
                        error = %track_err,
                        "failed to record document error"
                    );
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::HashProvider;
    use crate::extract::{DocumentExtractor, ExtractedDocument};
    use crate::store::memory::InMemoryVectorStore;
    use std::path::Path;

    struct FixedExtractor {
        text: String,
        pages: i64,
    }

    #[async_trait]
    impl DocumentExtractor for FixedExtractor {
        async fn extract(&self, _path: &Path) -> Result<ExtractedDocument> {
            Ok(ExtractedDocument {
                text: self.text.clone(),
                num_pages: self.pages,
                metadata: serde_json::json!({"extractor": "fixed"}),
            })
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl DocumentExtractor for BrokenExtractor {
        async fn extract(&self, _path: &Path) -> Result<ExtractedDocument> {
            Err(PipelineError::ExtractionFailed("corrupt file".to_string()))
        }
    }

    fn pipeline_with(
        extractor: Arc<dyn DocumentExtractor>,
    ) -> (IngestPipeline, Arc<InMemoryVectorStore>, Arc<StatusTracker>) {
        let config = Config::default();
        let store = Arc::new(InMemoryVectorStore::new());
        let tracker = Arc::new(StatusTracker::new(Duration::from_secs(86400)));
        let pipeline = IngestPipeline::new(
            extractor,
            Arc::new(HashProvider::new(64)),
            store.clone(),
            tracker.clone(),
            &config,
        );
        (pipeline, store, tracker)
    }

    fn request(doc: &str) -> IngestRequest {
        IngestRequest {
            document_id: doc.to_string(),
            source_path: PathBuf::from("/tmp/unused.txt"),
            file_meta: serde_json::json!({"filename": "unused.txt"}),
        }
    }

    #[tokio::test]
    async fn successful_ingest_stores_and_completes() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(80);
        let (pipeline, store, tracker) = pipeline_with(Arc::new(FixedExtractor {
            text,
            pages: 2,
        }));
        tracker.register("doc1", serde_json::Value::Null);

        let progress = JobProgress::noop();
        let summary = pipeline
            .run_inner(&request("doc1"), &progress)
            .await
            .unwrap();

        assert!(summary.chunk_count > 0);
        assert_eq!(store.len(), summary.chunk_count);
        assert!(summary.pseudo_embeddings);
        assert!(tracker.is_ready_for_chat("doc1"));
        assert_eq!(tracker.status("doc1").unwrap().progress, 100);
    }

    #[tokio::test]
    async fn failed_extraction_marks_error_and_leaves_store_empty() {
        let (pipeline, store, tracker) = pipeline_with(Arc::new(BrokenExtractor));
        tracker.register("doc1", serde_json::Value::Null);

        let err = pipeline
            .run(request("doc1"), JobProgress::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed(_)));
        assert!(store.is_empty());

        let status = tracker.status("doc1").unwrap();
        assert_eq!(status.stage, DocumentStage::Error);
        assert!(status.error.as_deref().unwrap().contains("corrupt"));
        assert!(!tracker.is_ready_for_chat("doc1"));
    }

    #[tokio::test]
    async fn empty_document_fails() {
        let (pipeline, store, tracker) = pipeline_with(Arc::new(FixedExtractor {
            text: "   \n\n  ".to_string(),
            pages: 1,
        }));
        tracker.register("doc1", serde_json::Value::Null);

        let err = pipeline
            .run(request("doc1"), JobProgress::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed(_)));
        assert!(store.is_empty());
        assert_eq!(
            tracker.status("doc1").unwrap().stage,
            DocumentStage::Error
        );
    }

    #[test]
    fn extract_timeout_scales_with_size_and_caps() {
        let base = Duration::from_secs(60);
        assert_eq!(extract_timeout(base, 0), Duration::from_secs(60));
        assert_eq!(
            extract_timeout(base, 25 * 1024 * 1024),
            Duration::from_secs(180)
        );
        assert_eq!(
            extract_timeout(base, 500 * 1024 * 1024),
            Duration::from_secs(300)
        );
    }
}
