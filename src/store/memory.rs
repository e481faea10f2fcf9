//! In-memory [`VectorStore`] implementation.
//!
//! Holds every record in one `Vec` behind a single `RwLock`: `add` and
//! `delete_document` are each one write-locked critical section, so a
//! concurrent reader never observes a half-appended document. `query`
//! takes the read lock and scans the whole list — brute-force cosine
//! similarity is correct and fast enough at the scale this crate targets
//! (thousands of chunks per process). An ANN index is a future
//! optimization, deliberately not built here.
//!
//! In-memory storage is a design decision, not a gap: the surrounding
//! system re-ingests on restart, and durability is explicitly out of
//! scope.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::embedding::cosine_similarity;
use crate::error::{PipelineError, Result};
use crate::models::{Chunk, VectorRecord};

use super::{DocumentStats, QueryHit, VectorStore};

struct StoreInner {
    records: Vec<VectorRecord>,
    /// Dimensionality of every stored embedding. Fixed by the first `add`;
    /// a store mixing dimensions is corrupt, so mismatches fail fast.
    dims: Option<usize>,
}

pub struct InMemoryVectorStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: Vec::new(),
                dims: None,
            }),
        }
    }

    /// Total record count across all documents.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        metadata: &serde_json::Value,
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(PipelineError::InvalidConfiguration(format!(
                "chunk/embedding count mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.write().unwrap();

        let expected = inner.dims.unwrap_or(embeddings[0].len());
        for e in embeddings {
            if e.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    actual: e.len(),
                });
            }
        }

        // All records land inside this one critical section; a reader sees
        // either none of the document or all of it.
        for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
            let mut record_meta = metadata.clone();
            if let Some(map) = record_meta.as_object_mut() {
                map.insert("chunk_index".to_string(), chunk.chunk_index.into());
                map.insert("estimated_page".to_string(), chunk.estimated_page.into());
                map.insert(
                    "content_flags".to_string(),
                    serde_json::to_value(chunk.flags).unwrap_or_default(),
                );
            }
            inner.records.push(VectorRecord {
                id: VectorRecord::record_id(document_id, chunk.chunk_index),
                document_id: document_id.to_string(),
                text: chunk.text.clone(),
                embedding: embedding.clone(),
                metadata: record_meta,
            });
        }
        inner.dims = Some(expected);

        info!(document_id, chunks = chunks.len(), "stored document vectors");
        Ok(chunks.len())
    }

    async fn query(
        &self,
        query_vec: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let inner = self.inner.read().unwrap();

        if let Some(expected) = inner.dims {
            if query_vec.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    actual: query_vec.len(),
                });
            }
        }

        let mut hits: Vec<QueryHit> = inner
            .records
            .iter()
            .filter(|r| document_id.map_or(true, |id| r.document_id == id))
            .map(|r| QueryHit {
                record_id: r.id.clone(),
                document_id: r.document_id.clone(),
                text: r.text.clone(),
                similarity: cosine_similarity(query_vec, &r.embedding),
                metadata: r.metadata.clone(),
            })
            .collect();

        // Stable sort: equal similarities keep insertion order.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.records.len();
        inner.records.retain(|r| r.document_id != document_id);
        let removed = before - inner.records.len();
        if inner.records.is_empty() {
            inner.dims = None;
        }
        debug!(document_id, removed, "deleted document from vector store");
        Ok(removed > 0)
    }

    async fn stats(&self, document_id: &str) -> Result<DocumentStats> {
        let inner = self.inner.read().unwrap();
        let matching: Vec<&VectorRecord> = inner
            .records
            .iter()
            .filter(|r| r.document_id == document_id)
            .collect();
        Ok(DocumentStats {
            chunk_count: matching.len(),
            sample_metadata: matching.first().map(|r| r.metadata.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentFlags;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            start_offset: index * 100,
            end_offset: index * 100 + text.len(),
            estimated_page: 1,
            chunk_index: index,
            flags: ContentFlags::default(),
        }
    }

    fn meta() -> serde_json::Value {
        serde_json::json!({ "filename": "test.pdf" })
    }

    #[tokio::test]
    async fn add_and_query_ranked() {
        let store = InMemoryVectorStore::new();
        let chunks = vec![chunk(0, "alpha"), chunk(1, "beta"), chunk(2, "gamma")];
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.7, 0.7, 0.0],
        ];
        let created = store.add("doc1", &chunks, &embeddings, &meta()).await.unwrap();
        assert_eq!(created, 3);

        let hits = store.query(&[1.0, 0.0, 0.0], None, 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].record_id, "doc1_chunk_0");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].record_id, "doc1_chunk_2");
        assert_eq!(hits[2].record_id, "doc1_chunk_1");

        // top-k is a prefix of the full ordering
        let top = store.query(&[1.0, 0.0, 0.0], None, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].record_id, hits[0].record_id);
        assert_eq!(top[1].record_id, hits[1].record_id);
    }

    #[tokio::test]
    async fn ties_break_by_insertion_order() {
        let store = InMemoryVectorStore::new();
        let chunks = vec![chunk(0, "first"), chunk(1, "second"), chunk(2, "third")];
        // chunks 0 and 2 are identical vectors: equal similarity to any query
        let embeddings = vec![
            vec![1.0, 1.0],
            vec![-1.0, 0.5],
            vec![1.0, 1.0],
        ];
        store.add("doc1", &chunks, &embeddings, &meta()).await.unwrap();

        let hits = store.query(&[1.0, 1.0], None, 3).await.unwrap();
        assert_eq!(hits[0].record_id, "doc1_chunk_0");
        assert_eq!(hits[1].record_id, "doc1_chunk_2");
    }

    #[tokio::test]
    async fn length_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        let err = store
            .add("doc1", &[chunk(0, "a")], &[], &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_fast() {
        let store = InMemoryVectorStore::new();
        store
            .add("doc1", &[chunk(0, "a")], &[vec![1.0, 0.0]], &meta())
            .await
            .unwrap();

        let err = store
            .add("doc2", &[chunk(0, "b")], &[vec![1.0, 0.0, 0.0]], &meta())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch { expected: 2, actual: 3 }
        ));

        let err = store.query(&[1.0], None, 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn mixed_dims_within_one_add_rejected_atomically() {
        let store = InMemoryVectorStore::new();
        let err = store
            .add(
                "doc1",
                &[chunk(0, "a"), chunk(1, "b")],
                &[vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
                &meta(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        // nothing was written
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn document_filter_isolates() {
        let store = InMemoryVectorStore::new();
        store
            .add("docA", &[chunk(0, "a")], &[vec![1.0, 0.0]], &meta())
            .await
            .unwrap();
        store
            .add("docB", &[chunk(0, "b")], &[vec![1.0, 0.0]], &meta())
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], Some("docA"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.document_id == "docA"));
    }

    #[tokio::test]
    async fn delete_is_complete() {
        let store = InMemoryVectorStore::new();
        store
            .add(
                "docA",
                &[chunk(0, "a"), chunk(1, "b")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                &meta(),
            )
            .await
            .unwrap();
        store
            .add("docB", &[chunk(0, "c")], &[vec![1.0, 1.0]], &meta())
            .await
            .unwrap();

        assert!(store.delete_document("docA").await.unwrap());
        assert!(!store.delete_document("docA").await.unwrap());

        let hits = store.query(&[1.0, 0.0], Some("docA"), 10).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(store.stats("docA").await.unwrap().chunk_count, 0);
        assert_eq!(store.stats("docB").await.unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn stats_carry_sample_metadata() {
        let store = InMemoryVectorStore::new();
        store
            .add("docA", &[chunk(0, "a")], &[vec![1.0, 0.0]], &meta())
            .await
            .unwrap();

        let stats = store.stats("docA").await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        let sample = stats.sample_metadata.unwrap();
        assert_eq!(sample["filename"], "test.pdf");
        assert_eq!(sample["chunk_index"], 0);
        assert_eq!(sample["estimated_page"], 1);
    }

    #[tokio::test]
    async fn query_on_empty_store_returns_nothing() {
        let store = InMemoryVectorStore::new();
        let hits = store.query(&[1.0, 0.0], None, 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
