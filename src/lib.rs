//! # sow-extract
//!
//! Extract milestones, deliverables and payment terms from Statement-of-Work
//! PDFs.
//!
//! ## Why this crate?
//!
//! SOWs are long, loosely structured contracts. The few facts a project
//! tracker needs (what is due, when, and what it pays) hide in tables,
//! schedules and prose spread across dozens of pages. This crate turns the
//! PDF into markdown, cuts it into sections, asks a language model which
//! sections matter and what they say, and then merges and validates the
//! answers deterministically.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract    native text + tables via pdfium, vision OCR for scanned pages
//!  ├─ 2. Normalize  one markdown document with headings and pipe tables
//!  ├─ 3. Segment    heading-delimited sections (lossless spans)
//!  ├─ 4. Filter     relevance per section (oracle, fail-open)
//!  ├─ 5. Structure  one-shot extraction per (section, category)
//!  ├─ 6. Aggregate  dedup, validate, resolve references, score confidence
//!  └─ 7. Sync       optional: post milestones to TargetProcess
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sow_extract::{Document, ExtractionConfig, SowExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from EDGEQUAKE_LLM_PROVIDER / OPENAI_API_KEY / …
//!     let extractor = SowExtractor::from_config(ExtractionConfig::default(), None)?;
//!     let doc = Document::from_path("sow.pdf").await?;
//!     let result = extractor.run(doc, false).await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `sow-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server`  | on      | The axum HTTP layer in [`server`] |
//! | `bundled` | off     | Embed the pdfium shared library at build time |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod model;
pub mod oracle;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod sync;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{collect_pdfs, extract_batch, BatchItem, BatchStream};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, RelevanceStrategy, SyncConfig};
pub use error::{ErrorCategory, OracleError, PipelineFailure, SowError, SyncError};
pub use model::{Category, Deliverable, Milestone, PaymentTerm, Section};
pub use oracle::{LlmOracle, OcrEngine, Oracle, OracleLimiter, VisionOcr};
pub use orchestrator::{inspect, Inspection, RunOutput, SowExtractor, Stage};
pub use output::{ExtractionResult, ExtractionStatus, Metadata, SyncFailure, SyncStatus};
pub use pipeline::extract::{PdfiumExtractor, StaticPages, TextExtractor};
pub use pipeline::input::Document;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use sync::{MilestoneSink, SyncReport, TargetProcessClient};
