//! # Docpipe
//!
//! Document ingestion and retrieval pipeline for chat-with-your-documents
//! applications. Uploaded files (bank statements, reports, plain text) are
//! extracted, chunked with financial-document-aware heuristics, embedded,
//! and stored in an in-memory vector store for cosine-similarity
//! retrieval. Ingestion runs as background jobs on a bounded-concurrency
//! queue, with per-document status a UI can poll.
//!
//! ## Architecture
//!
//! ```text
//! upload ──> DocumentService::enqueue_ingestion
//!                 │
//!                 ▼
//!            JobQueue (max N concurrent)
//!                 │ runs
//!                 ▼
//!            IngestPipeline: extract ─> chunk ─> embed ─> store.add
//!                 │ checkpoints
//!                 ▼
//!            StatusTracker (uploading..completed|error)
//!
//! question ──> DocumentService::query ─> embed ─> VectorStore::query
//! ```
//!
//! ## Modules
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | TOML configuration with validated defaults |
//! | [`extract`] | PDF/plain-text extraction behind [`extract::DocumentExtractor`] |
//! | [`chunk`] | Offset-tracked chunking with financial heuristics |
//! | [`embedding`] | Embedding providers, fallback chain, cosine similarity |
//! | [`store`] | [`store::VectorStore`] trait + in-memory implementation |
//! | [`tracker`] | Monotonic per-document status |
//! | [`queue`] | Bounded-concurrency background job queue |
//! | [`ingest`] | The extract/chunk/embed/store pipeline |
//! | [`service`] | Composition root and public facade |
//!
//! All state is in-process and lost on restart. That is a design
//! decision: the surrounding application re-ingests on startup, and
//! durable storage is explicitly out of scope.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod queue;
pub mod service;
pub mod store;
pub mod tracker;

pub use config::{load_config, Config};
pub use error::{PipelineError, Result};
pub use service::{DocumentService, QueryResponse};
