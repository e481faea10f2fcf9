//! Per-document processing status.
//!
//! A passive keyed record store with monotonic status progression:
//!
//! ```text
//! uploading -> uploaded -> processing -> vectorizing -> completed
//!      \___________\____________\_____________\______-> error
//! ```
//!
//! Transitions are driven externally by the ingestion job's phase
//! checkpoints; the tracker has no timers or polling of its own. No
//! transition moves backward, and `error` is reachable from any
//! non-terminal stage. Terminal mutators are idempotent. Chat gating
//! reads this (never mutates): a document is ready for retrieval iff its
//! status is `completed`, and a document stuck in `error` stays
//! not-ready until a fresh ingestion under a new document ID succeeds.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStage {
    Uploading,
    Uploaded,
    Processing,
    Vectorizing,
    Completed,
    Error,
}

impl DocumentStage {
    /// Position in the monotonic progression. `Error` ranks alongside
    /// `Completed`: both are terminal.
    fn rank(self) -> u8 {
        match self {
            DocumentStage::Uploading => 0,
            DocumentStage::Uploaded => 1,
            DocumentStage::Processing => 2,
            DocumentStage::Vectorizing => 3,
            DocumentStage::Completed => 4,
            DocumentStage::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStage::Completed | DocumentStage::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStage::Uploading => "uploading",
            DocumentStage::Uploaded => "uploaded",
            DocumentStage::Processing => "processing",
            DocumentStage::Vectorizing => "vectorizing",
            DocumentStage::Completed => "completed",
            DocumentStage::Error => "error",
        }
    }
}

/// Externally visible processing state of one uploaded document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub document_id: String,
    pub stage: DocumentStage,
    pub progress: u8,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct StatusTracker {
    inner: RwLock<HashMap<String, DocumentStatus>>,
    ttl: Duration,
}

impl StatusTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create the status record at upload time. Re-registering an existing
    /// ID is a no-op (a retried upload gets a fresh document ID).
    pub fn register(&self, document_id: &str, metadata: serde_json::Value) {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        inner
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentStatus {
                document_id: document_id.to_string(),
                stage: DocumentStage::Uploaded,
                progress: 0,
                error: None,
                metadata,
                created_at: now,
                updated_at: now,
            });
    }

    /// Advance a document to `stage` with the given progress. Backward
    /// transitions and mutations of a terminal record are ignored (with a
    /// log line), keeping the progression monotonic and terminal states
    /// immutable. Repeating the current terminal stage is an idempotent
    /// no-op.
    pub fn set_stage(&self, document_id: &str, stage: DocumentStage, progress: u8) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let status = inner
            .get_mut(document_id)
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;

        if status.stage.is_terminal() {
            if stage != status.stage {
                warn!(
                    document_id,
                    from = status.stage.as_str(),
                    to = stage.as_str(),
                    "ignoring transition out of terminal stage"
                );
            }
            return Ok(());
        }
        if stage.rank() < status.stage.rank() {
            warn!(
                document_id,
                from = status.stage.as_str(),
                to = stage.as_str(),
                "ignoring backward stage transition"
            );
            return Ok(());
        }

        status.stage = stage;
        status.progress = status.progress.max(progress.min(100));
        status.updated_at = Utc::now();
        debug!(document_id, stage = stage.as_str(), progress = status.progress, "document stage");
        Ok(())
    }

    /// Raise progress within the current stage. Progress never decreases.
    pub fn update_progress(&self, document_id: &str, progress: u8) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let status = inner
            .get_mut(document_id)
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;
        if !status.stage.is_terminal() {
            status.progress = status.progress.max(progress.min(100));
            status.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn mark_completed(&self, document_id: &str) -> Result<()> {
        self.set_stage(document_id, DocumentStage::Completed, 100)
    }

    /// Reachable from any non-terminal stage; idempotent once set.
    pub fn mark_error(&self, document_id: &str, message: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let status = inner
            .get_mut(document_id)
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))?;
        if status.stage.is_terminal() {
            return Ok(());
        }
        status.stage = DocumentStage::Error;
        status.error = Some(message.to_string());
        status.updated_at = Utc::now();
        Ok(())
    }

    /// Snapshot for one document. Unknown IDs are a typed not-found so
    /// callers can tell "never uploaded" from "not yet processing".
    pub fn status(&self, document_id: &str) -> Result<DocumentStatus> {
        self.inner
            .read()
            .unwrap()
            .get(document_id)
            .cloned()
            .ok_or_else(|| PipelineError::DocumentNotFound(document_id.to_string()))
    }

    /// True iff ingestion finished successfully.
    pub fn is_ready_for_chat(&self, document_id: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .get(document_id)
            .map_or(false, |s| s.stage == DocumentStage::Completed)
    }

    pub fn is_processing(&self, document_id: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .get(document_id)
            .map_or(false, |s| !s.stage.is_terminal())
    }

    pub fn remove(&self, document_id: &str) -> bool {
        self.inner.write().unwrap().remove(document_id).is_some()
    }

    /// Drop terminal records not updated within the TTL. Returns the IDs of
    /// the removed documents so the caller can release whatever else still
    /// references them (stored vectors in particular).
    pub fn sweep_expired(&self) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut inner = self.inner.write().unwrap();
        let expired: Vec<String> = inner
            .values()
            .filter(|s| s.stage.is_terminal() && s.updated_at < cutoff)
            .map(|s| s.document_id.clone())
            .collect();
        for id in &expired {
            inner.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StatusTracker {
        StatusTracker::new(Duration::from_secs(86400))
    }

    #[test]
    fn register_starts_uploaded() {
        let t = tracker();
        t.register("doc1", serde_json::json!({"filename": "a.pdf"}));
        let s = t.status("doc1").unwrap();
        assert_eq!(s.stage, DocumentStage::Uploaded);
        assert_eq!(s.progress, 0);
        assert!(t.is_processing("doc1"));
        assert!(!t.is_ready_for_chat("doc1"));
    }

    #[test]
    fn unknown_document_is_not_found() {
        let t = tracker();
        assert!(matches!(
            t.status("nope").unwrap_err(),
            PipelineError::DocumentNotFound(_)
        ));
        assert!(!t.is_ready_for_chat("nope"));
        assert!(!t.is_processing("nope"));
    }

    #[test]
    fn forward_progression_to_completed() {
        let t = tracker();
        t.register("doc1", serde_json::Value::Null);
        t.set_stage("doc1", DocumentStage::Processing, 10).unwrap();
        t.set_stage("doc1", DocumentStage::Vectorizing, 70).unwrap();
        t.mark_completed("doc1").unwrap();

        let s = t.status("doc1").unwrap();
        assert_eq!(s.stage, DocumentStage::Completed);
        assert_eq!(s.progress, 100);
        assert!(t.is_ready_for_chat("doc1"));
        assert!(!t.is_processing("doc1"));
    }

    #[test]
    fn backward_transitions_ignored() {
        let t = tracker();
        t.register("doc1", serde_json::Value::Null);
        t.set_stage("doc1", DocumentStage::Vectorizing, 70).unwrap();
        t.set_stage("doc1", DocumentStage::Processing, 10).unwrap();
        assert_eq!(t.status("doc1").unwrap().stage, DocumentStage::Vectorizing);
        // progress never decreases either
        assert_eq!(t.status("doc1").unwrap().progress, 70);
    }

    #[test]
    fn terminal_states_immutable() {
        let t = tracker();
        t.register("doc1", serde_json::Value::Null);
        t.mark_error("doc1", "extraction blew up").unwrap();

        t.set_stage("doc1", DocumentStage::Vectorizing, 90).unwrap();
        t.mark_completed("doc1").unwrap();
        let s = t.status("doc1").unwrap();
        assert_eq!(s.stage, DocumentStage::Error);
        assert_eq!(s.error.as_deref(), Some("extraction blew up"));
        assert!(!t.is_ready_for_chat("doc1"));

        // idempotent terminal re-marking
        t.mark_error("doc1", "different message").unwrap();
        assert_eq!(
            t.status("doc1").unwrap().error.as_deref(),
            Some("extraction blew up")
        );
    }

    #[test]
    fn error_reachable_from_any_non_terminal_stage() {
        for stage in [
            DocumentStage::Uploaded,
            DocumentStage::Processing,
            DocumentStage::Vectorizing,
        ] {
            let t = tracker();
            t.register("doc1", serde_json::Value::Null);
            t.set_stage("doc1", stage, 50).unwrap();
            t.mark_error("doc1", "boom").unwrap();
            assert_eq!(t.status("doc1").unwrap().stage, DocumentStage::Error);
        }
    }

    #[test]
    fn sweep_removes_only_expired_terminal_records() {
        let t = StatusTracker::new(Duration::from_secs(0));
        t.register("done", serde_json::Value::Null);
        t.mark_completed("done").unwrap();
        t.register("active", serde_json::Value::Null);
        t.set_stage("active", DocumentStage::Processing, 10).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let removed = t.sweep_expired();
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(t.status("done").is_err());
        assert!(t.status("active").is_ok());
    }
}
