//! Pipeline stages for SOW extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own. Only [`extract`], [`relevance`] and [`structured`] talk to the
//! oracle; everything else is deterministic.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ normalize ──▶ segment ──▶ relevance ──▶ structured ──▶ aggregate
//! (bytes)   (pdfium)    (markdown)    (sections)  (labels)      (candidates)   (records)
//! ```
//!
//! 1. [`input`]: validate a path, upload or base64 payload as a PDF
//! 2. [`extract`]: per-page text and tables; [`layout`] reads the native
//!    text layer, [`render`] + [`encode`] feed scanned pages to OCR and
//!    [`postprocess`] cleans what comes back
//! 3. [`normalize`]: one markdown document with headings and pipe tables
//! 4. [`segment`]: heading-delimited sections with lossless spans
//! 5. [`relevance`]: which categories each section may contain
//! 6. [`structured`]: one-shot extraction per (section, category), parsed
//!    leniently by [`response`]
//! 7. [`aggregate`]: dedup, [`validate`], resolve references, score

pub mod aggregate;
pub mod encode;
pub mod extract;
pub mod input;
pub mod layout;
pub mod normalize;
pub mod postprocess;
pub mod relevance;
pub mod render;
pub mod response;
pub mod segment;
pub mod structured;
pub mod validate;
