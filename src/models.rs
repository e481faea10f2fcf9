//! Core data models used throughout the pipeline.
//!
//! These types represent the chunks and vector records that flow through
//! ingestion and retrieval.

use serde::{Deserialize, Serialize};

/// Advisory content tags detected per chunk. Never required for
/// correctness; carried into record metadata for downstream consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFlags {
    pub contains_amounts: bool,
    pub contains_dates: bool,
    pub contains_transactions: bool,
    pub contains_account_info: bool,
}

/// A contiguous slice of a document's extracted text.
///
/// `start_offset`/`end_offset` are byte offsets of the raw slice into the
/// source text (before whitespace trimming), so consecutive chunk spans
/// tile the input with the configured overlap. `text` is the trimmed
/// content of that slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Best-effort page attribution, clamped to `[1, total_pages]`.
    pub estimated_page: u32,
    /// Unique within a document, assigned in creation order.
    pub chunk_index: usize,
    pub flags: ContentFlags,
}

/// A chunk plus its embedding, as stored by the vector store.
///
/// `id` is formed deterministically from the document ID and chunk index
/// (`{document_id}_chunk_{chunk_index}`). Records are created in bulk
/// during ingestion, deleted in bulk with their document, and never
/// individually mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Carries `chunk_index`, `estimated_page`, `total_pages`, the content
    /// flags, embedding provenance, and caller-supplied document metadata.
    pub metadata: serde_json::Value,
}

impl VectorRecord {
    pub fn record_id(document_id: &str, chunk_index: usize) -> String {
        format!("{}_chunk_{}", document_id, chunk_index)
    }
}
