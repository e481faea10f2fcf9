//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the capability interface between the
//! ingestion pipeline and whatever holds the embeddings. Selection happens
//! once at startup (composition root), not via scattered runtime checks.
//! The crate ships one implementation, [`memory::InMemoryVectorStore`];
//! the seam exists so a remote/persistent backend can slot in later.
//!
//! Implementations must be `Send + Sync` to be shared between ingestion
//! workers and query callers.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::Chunk;

/// One ranked hit returned from [`VectorStore::query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub record_id: String,
    pub document_id: String,
    pub text: String,
    /// Cosine similarity to the query vector, in `[-1, 1]`.
    pub similarity: f32,
    pub metadata: serde_json::Value,
}

/// Per-document store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStats {
    pub chunk_count: usize,
    /// Metadata of the document's first record, if any.
    pub sample_metadata: Option<serde_json::Value>,
}

/// Storage for embedded chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Batch-append one document's records |
/// | [`query`](VectorStore::query) | Brute-force cosine-similarity search |
/// | [`delete_document`](VectorStore::delete_document) | Remove a document's records |
/// | [`stats`](VectorStore::stats) | Per-document record count + sample metadata |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append one record per chunk for `document_id`. Called exactly once
    /// per successful ingestion, after all embeddings are computed, so a
    /// failed job writes nothing (at-most-once, never partial).
    ///
    /// Preconditions: `chunks.len() == embeddings.len()`, and every
    /// embedding must match the dimensionality of existing records.
    /// Returns the number of records created.
    async fn add(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        metadata: &serde_json::Value,
    ) -> Result<usize>;

    /// Rank all records (optionally pre-filtered to `document_id`) by
    /// cosine similarity to `query_vec`, descending, returning at most
    /// `limit` hits. Ties are broken by insertion order — a deliberate,
    /// documented contract, not an accident of the sort algorithm.
    async fn query(
        &self,
        query_vec: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueryHit>>;

    /// Remove every record belonging to `document_id`, atomically with
    /// respect to concurrent queries. Returns whether anything was removed.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;

    /// Record count and sample metadata for one document. A document with
    /// no records reports a zero count (not an error).
    async fn stats(&self, document_id: &str) -> Result<DocumentStats>;
}
