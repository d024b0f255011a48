//! Result types returned by the extraction pipeline.
//!
//! [`ExtractionResult`] is the JSON surface shared by the library, the CLI
//! and the HTTP service:
//!
//! ```json
//! { "status": "success", "milestones": [..], "deliverables": [..],
//!   "payment_terms": [..], "metadata": { .. } }
//! ```

use crate::error::SowError;
use crate::model::{Category, Deliverable, Milestone, PaymentTerm};
use crate::orchestrator::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Label reported in `metadata.extraction_method`.
pub const EXTRACTION_METHOD: &str = "sectioned_llm_extraction";

/// Whether the result can be used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Confidence reached the review threshold and nothing degraded.
    Success,
    /// Usable, but a human should review it.
    Partial,
}

/// Outcome of the downstream milestone sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The caller did not ask for a sync.
    #[default]
    NotRequested,
    /// Requested, but no credentials are configured (or no milestones).
    Skipped,
    Success,
    /// Some milestones were accepted, some were not.
    Partial,
    Failed,
}

/// Something that degraded the result without failing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub message: String,
}

/// A milestone the downstream service did not accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub milestone: String,
    pub error: String,
}

/// A duplicate merge where the payment amounts disagreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub category: Category,
    pub name: String,
    /// Section whose record was kept (the later one).
    pub kept_section: String,
    pub kept_amount: Option<String>,
    pub replaced_section: String,
    pub replaced_amount: Option<String>,
}

/// Processing metadata attached to every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// In `[0, 1]`; see [`crate::pipeline::aggregate::confidence`].
    pub processing_confidence: f64,
    pub sections_found: usize,
    /// Number of sections labelled relevant, per category.
    pub relevant_sections: BTreeMap<Category, usize>,
    /// Titles of the sections that produced surviving records, per category.
    pub category_sources: BTreeMap<Category, Vec<String>>,
    pub processing_time_ms: u64,
    pub pages: usize,
    pub ocr_pages: usize,
    pub tables_found: usize,
    pub milestones_extracted: usize,
    pub deliverables_extracted: usize,
    pub extraction_method: String,
    pub anomalies: Vec<Anomaly>,
    pub validation_notes: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub sync_status: SyncStatus,
    pub milestones_synced: usize,
    /// Per-milestone sync rejections; empty unless a sync ran.
    #[serde(default)]
    pub sync_errors: Vec<SyncFailure>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            processing_confidence: 0.0,
            sections_found: 0,
            relevant_sections: BTreeMap::new(),
            category_sources: BTreeMap::new(),
            processing_time_ms: 0,
            pages: 0,
            ocr_pages: 0,
            tables_found: 0,
            milestones_extracted: 0,
            deliverables_extracted: 0,
            extraction_method: EXTRACTION_METHOD.to_string(),
            anomalies: Vec::new(),
            validation_notes: Vec::new(),
            conflicts: Vec::new(),
            sync_status: SyncStatus::NotRequested,
            milestones_synced: 0,
            sync_errors: Vec::new(),
        }
    }
}

/// Final output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub status: ExtractionStatus,
    pub milestones: Vec<Milestone>,
    pub deliverables: Vec<Deliverable>,
    pub payment_terms: Vec<PaymentTerm>,
    pub metadata: Metadata,
}

impl ExtractionResult {
    /// Recompute `status` from confidence and anomalies.
    pub fn grade(&mut self, review_threshold: f64) {
        self.status = if self.metadata.processing_confidence >= review_threshold
            && self.metadata.anomalies.is_empty()
        {
            ExtractionStatus::Success
        } else {
            ExtractionStatus::Partial
        };
    }
}

/// Write `contents` to `path` via a sibling temp file and a rename, so
/// readers never see a half-written result.
pub async fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), SowError> {
    let path = path.as_ref();
    let failed = |source| SowError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, contents).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)
}
