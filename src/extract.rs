//! Text-extraction collaborators.
//!
//! The pipeline treats extraction as an external concern behind the
//! [`DocumentExtractor`] trait: given a file path, return plain text plus
//! a page count. Two implementations ship with the crate — PDF (via
//! `pdf-extract`) and plain text. A failed or unreadable document surfaces
//! as [`PipelineError::ExtractionFailed`] and fails the owning job; the
//! pipeline never panics on bad input bytes.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Characters-per-page average used when a format carries no page
/// structure of its own.
const FALLBACK_CHARS_PER_PAGE: usize = 3000;

/// Result of extracting one document.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    /// Always >= 1 for non-empty text.
    pub num_pages: i64,
    pub metadata: serde_json::Value,
}

/// Extracts plain text from an uploaded document.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument>;
}

/// PDF extraction via `pdf-extract`.
///
/// Extraction is CPU-bound, so it runs on the blocking thread pool. Page
/// count comes from the form feeds `pdf-extract` emits between pages,
/// falling back to a characters-per-page estimate for single-page output.
pub struct PdfExtractor;

#[async_trait]
impl DocumentExtractor for PdfExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let path_buf = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path_buf))
            .await
            .map_err(|e| PipelineError::ExtractionFailed(format!("extraction task failed: {}", e)))?
            .map_err(|e| PipelineError::ExtractionFailed(e.to_string()))?;

        let form_feeds = text.matches('\u{0C}').count();
        let num_pages = if form_feeds > 0 {
            form_feeds as i64 + 1
        } else {
            estimate_pages(&text)
        };

        Ok(ExtractedDocument {
            metadata: serde_json::json!({
                "extractor": "pdf",
                "source_path": path.display().to_string(),
            }),
            text,
            num_pages,
        })
    }
}

/// Plain-text extraction (`.txt`, `.md`, transcripts).
///
/// Page count is estimated from the characters-per-page average since the
/// format has no page structure.
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::ExtractionFailed(format!("{}: {}", path.display(), e)))?;

        Ok(ExtractedDocument {
            num_pages: estimate_pages(&text),
            metadata: serde_json::json!({
                "extractor": "plain-text",
                "source_path": path.display().to_string(),
            }),
            text,
        })
    }
}

fn estimate_pages(text: &str) -> i64 {
    ((text.len() + FALLBACK_CHARS_PER_PAGE - 1) / FALLBACK_CHARS_PER_PAGE).max(1) as i64
}
