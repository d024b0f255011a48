//! Error types for the sow-extract library.
//!
//! Four error types reflect four distinct failure modes:
//!
//! * [`SowError`]: **Fatal**: the pipeline cannot produce a result at all
//!   (not a PDF, no extractable text, provider not configured, document
//!   timeout). Returned as `Err(SowError)` from the top-level entry points.
//!
//! * [`OracleError`]: **Transient**: one oracle call failed (timeout, rate
//!   limit, transport). Retried with backoff at the call site; exhaustion
//!   degrades the result (fail-open relevance, zero candidates) and is
//!   recorded as an anomaly instead of aborting the document.
//!
//! * [`SyncError`]: **Downstream**: the project-tracking service rejected or
//!   never received a milestone. Recorded in metadata, never fatal.
//!
//! * [`PipelineFailure`]: the structured `{stage, category, message}` value
//!   the orchestrator hands back when a run ends in `Failed`. It is what the
//!   HTTP layer serialises as the error body.

use crate::orchestrator::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse category of a fatal error, exposed to callers in error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unreadable, empty or non-PDF input. Never retried.
    Input,
    /// Invalid configuration or missing provider credentials.
    Config,
    /// The language-model service failed in a way that could not be degraded.
    Oracle,
    /// The whole-document wall-clock budget was exceeded.
    Timeout,
    /// Bug or unexpected runtime failure.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Config => "config",
            ErrorCategory::Oracle => "oracle",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the sow-extract library.
#[derive(Debug, Error)]
pub enum SowError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The payload is empty.
    #[error("Document '{filename}' is empty")]
    EmptyDocument { filename: String },

    /// The payload was read, but is not a PDF.
    #[error("'{filename}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { filename: String, magic: Vec<u8> },

    /// The uploaded filename does not carry a `.pdf` extension.
    #[error("Only PDF files are supported, got '{filename}'")]
    UnsupportedFileType { filename: String },

    /// A base64 `file_content` field could not be decoded.
    #[error("file_content is not valid base64: {detail}")]
    InvalidBase64 { detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{filename}' is corrupt: {detail}")]
    CorruptPdf { filename: String, detail: String },

    /// PDF requires a password but none (or a wrong one) was provided.
    #[error("PDF '{filename}' is encrypted and the password is missing or wrong")]
    PasswordRequired { filename: String },

    /// Every page came back empty, even after OCR.
    #[error("No extractable text in '{filename}' ({pages} pages, OCR included)")]
    NoExtractableText { filename: String, pages: usize },

    // ── Oracle errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The whole-document budget elapsed before the pipeline finished.
    #[error("Pipeline for '{filename}' timed out after {secs}s")]
    DocumentTimeout { filename: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SowError {
    /// Map the error onto the category reported to callers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SowError::FileNotFound { .. }
            | SowError::PermissionDenied { .. }
            | SowError::EmptyDocument { .. }
            | SowError::NotAPdf { .. }
            | SowError::UnsupportedFileType { .. }
            | SowError::InvalidBase64 { .. }
            | SowError::CorruptPdf { .. }
            | SowError::PasswordRequired { .. }
            | SowError::NoExtractableText { .. } => ErrorCategory::Input,
            SowError::ProviderNotConfigured { .. } => ErrorCategory::Oracle,
            SowError::DocumentTimeout { .. } => ErrorCategory::Timeout,
            SowError::InvalidConfig(_) | SowError::PdfiumBindingFailed(_) => {
                ErrorCategory::Config
            }
            SowError::OutputWriteFailed { .. } | SowError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

/// A failed oracle call.
///
/// Everything except [`OracleError::Auth`] is considered transient and is
/// retried by [`crate::oracle::with_retries`].
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum OracleError {
    /// The call did not answer within the per-call budget.
    #[error("oracle call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Quota exhausted, either locally (limiter) or upstream (HTTP 429).
    #[error("oracle rate limit exceeded: {detail}")]
    RateLimited { detail: String },

    /// Network / 5xx / malformed envelope from the provider.
    #[error("oracle transport error: {detail}")]
    Transport { detail: String },

    /// Credentials rejected (401/403): retrying will not help.
    #[error("oracle authentication error: {detail}")]
    Auth { detail: String },
}

impl OracleError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        !matches!(self, OracleError::Auth { .. })
    }
}

/// A failed milestone push to the project-tracking service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Request never completed (DNS, connect, timeout).
    #[error("request to {url} failed: {detail}")]
    Request { url: String, detail: String },

    /// The service answered with a non-success status.
    #[error("HTTP {status} from sync service: {body}")]
    Status { status: u16, body: String },
}

/// The structured outcome of a run that ended in `Failed`.
///
/// Never a partial result: when this is returned no `ExtractionResult`
/// exists for the document.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("pipeline failed during {stage}: {message}")]
pub struct PipelineFailure {
    /// The stage that was being attempted when the run failed.
    pub stage: Stage,
    pub category: ErrorCategory,
    pub message: String,
}

impl PipelineFailure {
    pub fn new(stage: Stage, error: &SowError) -> Self {
        Self {
            stage,
            category: error.category(),
            message: error.to_string(),
        }
    }
}
