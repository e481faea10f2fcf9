//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Errors inside a job's phases are caught at the job-execution boundary
//! (see [`queue`](crate::queue)) and recorded on the job and the document
//! status; they are never re-thrown past that boundary. Errors in `query`,
//! `add`, and `delete_document` propagate synchronously to the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Caller bug (e.g. chunker overlap >= target size). Never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Upstream document unreadable or corrupt. Surfaced as a job failure.
    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    /// All providers in the embedding fallback chain were exhausted.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Vector store invariant violation. A store mixing embedding
    /// dimensions is corrupt; this is treated as fatal for the store,
    /// never silently coerced.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Unknown document ID. Distinct from "zero results".
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Unknown job ID.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Document exists but its ingestion has not completed, so it cannot
    /// serve retrieval queries yet.
    #[error("document {document_id} is not ready for queries (status: {status})")]
    DocumentNotReady {
        document_id: String,
        status: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
