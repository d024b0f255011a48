//! The pipeline driver: runs every stage for one document.
//!
//! ```text
//! Ingested → Extracted → Normalized → Segmented → Filtered → Structured → Aggregated → Done
//!     └──────────────┴─────────────┴───────────┴─────────┴──────────┴─────────┴──→ Failed
//! ```
//!
//! Oracle failures never end a run: relevance fails open, extraction drops
//! the pair, both with an anomaly. Only whole-document problems (unreadable
//! PDF, no text at all, document timeout) end in [`Stage::Failed`] with a
//! [`PipelineFailure`]. The milestone sync runs after the result exists and
//! can only change `metadata.sync_status`.

use crate::config::{ExtractionConfig, SyncConfig};
use crate::error::{PipelineFailure, SowError};
use crate::model::{MarkdownDocument, PageBlock, Section};
use crate::oracle::{
    resolve_provider, LlmOracle, OcrEngine, Oracle, OracleContext, OracleLimiter, RetryPolicy,
    VisionOcr,
};
use crate::output::{ExtractionResult, ExtractionStatus, Metadata, SyncStatus};
use crate::pipeline::extract::{PdfiumExtractor, TextExtractor};
use crate::pipeline::input::Document;
use crate::pipeline::layout::LayoutConfig;
use crate::pipeline::render::ScanOptions;
use crate::pipeline::{aggregate, normalize, relevance, segment, structured};
use crate::sync::{sync_milestones, MilestoneSink, TargetProcessClient};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info};

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingested,
    Extracted,
    Normalized,
    Segmented,
    Filtered,
    Structured,
    Aggregated,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingested => "ingested",
            Stage::Extracted => "extracted",
            Stage::Normalized => "normalized",
            Stage::Segmented => "segmented",
            Stage::Filtered => "filtered",
            Stage::Structured => "structured",
            Stage::Aggregated => "aggregated",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished run: the result plus the markdown it was extracted from.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub result: ExtractionResult,
    pub markdown: MarkdownDocument,
}

/// Everything [`inspect`] can tell without calling the oracle.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub filename: String,
    pub pages: Vec<PageBlock>,
    pub markdown: String,
    pub sections: Vec<Section>,
}

/// Runs documents through the pipeline.
///
/// One extractor can serve many documents concurrently; the limiter it owns
/// is the quota shared by all of them.
pub struct SowExtractor {
    config: ExtractionConfig,
    oracle: Arc<dyn Oracle>,
    text: Arc<dyn TextExtractor>,
    limiter: Arc<OracleLimiter>,
    sink: Option<Arc<dyn MilestoneSink>>,
}

impl fmt::Debug for SowExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SowExtractor")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl SowExtractor {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        config: ExtractionConfig,
        oracle: Arc<dyn Oracle>,
        text: Arc<dyn TextExtractor>,
    ) -> Self {
        let limiter = Arc::new(OracleLimiter::from_config(&config));
        Self {
            config,
            oracle,
            text,
            limiter,
            sink: None,
        }
    }

    /// The production pipeline: pdfium + OCR on the resolved LLM provider.
    ///
    /// `sync` enables the TargetProcess sink; without it, sync requests are
    /// reported as `skipped`.
    pub fn from_config(
        config: ExtractionConfig,
        sync: Option<SyncConfig>,
    ) -> Result<Self, SowError> {
        let provider = resolve_provider(&config)?;
        info!("LLM provider resolved");
        let limiter = Arc::new(OracleLimiter::from_config(&config));
        let ocr: Arc<dyn OcrEngine> = Arc::new(VisionOcr::new(Arc::clone(&provider), &config));
        let text = PdfiumExtractor::new(
            scan_options(&config),
            Some(ocr),
            Arc::clone(&limiter),
            RetryPolicy::from_config(&config),
            config.concurrency,
        )
        .with_progress(config.progress_callback.clone());
        let oracle = Arc::new(LlmOracle::new(provider, &config));

        let sink: Option<Arc<dyn MilestoneSink>> = match sync {
            Some(sync) => Some(Arc::new(TargetProcessClient::new(sync)?)),
            None => None,
        };

        Ok(Self {
            config,
            oracle,
            text: Arc::new(text),
            limiter,
            sink,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn MilestoneSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share a limiter with other extractors in the process.
    pub fn with_limiter(mut self, limiter: Arc<OracleLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Read `path` and run it. I/O and validation failures are reported as
    /// `Ingested`-stage failures.
    pub async fn run_path(
        &self,
        path: impl AsRef<Path>,
        sync: bool,
    ) -> Result<RunOutput, PipelineFailure> {
        let doc = Document::from_path(path)
            .await
            .map_err(|e| PipelineFailure::new(Stage::Ingested, &e))?;
        self.run_detailed(doc, sync).await
    }

    /// Run `doc` and return only the result.
    pub async fn run(&self, doc: Document, sync: bool) -> Result<ExtractionResult, PipelineFailure> {
        self.run_detailed(doc, sync).await.map(|out| out.result)
    }

    /// Run `doc` through every stage, then optionally sync its milestones.
    pub async fn run_detailed(
        &self,
        doc: Document,
        sync: bool,
    ) -> Result<RunOutput, PipelineFailure> {
        let filename = doc.filename().to_string();
        let tracker = Mutex::new(Stage::Ingested);
        self.transition(&filename, Stage::Ingested);

        let budget = self.config.document_timeout();
        let outcome = match tokio::time::timeout(budget, self.run_stages(&doc, &tracker)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SowError::DocumentTimeout {
                filename: filename.clone(),
                secs: budget.as_secs(),
            }),
        };

        let mut output = match outcome {
            Ok(output) => output,
            Err(e) => {
                let stage = *tracker.lock().unwrap_or_else(|p| p.into_inner());
                let failure = PipelineFailure::new(stage, &e);
                error!("{}: failed during {}: {}", filename, stage, e);
                self.transition(&filename, Stage::Failed);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_finished(&filename, Some(&failure.message));
                }
                return Err(failure);
            }
        };

        let metadata = &mut output.result.metadata;
        if sync {
            match (&self.sink, output.result.milestones.is_empty()) {
                (Some(sink), false) => {
                    let milestones = output.result.milestones.clone();
                    let report = sync_milestones(sink.as_ref(), milestones).await;
                    metadata.sync_status = report.status();
                    metadata.milestones_synced = report.sent;
                    metadata.sync_errors = report.failures;
                }
                _ => metadata.sync_status = SyncStatus::Skipped,
            }
        }

        output.result.grade(self.config.review_threshold);
        self.transition(&filename, Stage::Done);
        info!(
            "{}: {:?}, confidence {:.2}, {} milestones, {} deliverables, {} payment terms",
            filename,
            output.result.status,
            output.result.metadata.processing_confidence,
            output.result.milestones.len(),
            output.result.deliverables.len(),
            output.result.payment_terms.len()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_finished(&filename, None);
        }
        Ok(output)
    }

    async fn run_stages(
        &self,
        doc: &Document,
        tracker: &Mutex<Stage>,
    ) -> Result<RunOutput, SowError> {
        let started = Instant::now();
        let filename = doc.filename();
        let attempt = |stage: Stage| {
            if let Ok(mut current) = tracker.lock() {
                *current = stage;
            }
        };

        // ── Step 1: Extract text and tables ──────────────────────────────────
        attempt(Stage::Extracted);
        let pages = self.text.extract(doc).await?;
        ensure_text(filename, &pages)?;
        self.transition(filename, Stage::Extracted);

        // ── Step 2: Normalise to markdown ────────────────────────────────────
        attempt(Stage::Normalized);
        let markdown = normalize::normalize(filename, &pages);
        self.transition(filename, Stage::Normalized);

        // ── Step 3: Segment ──────────────────────────────────────────────────
        attempt(Stage::Segmented);
        let sections = segment::segment(&markdown);
        self.transition(filename, Stage::Segmented);

        // ── Step 4: Relevance filter ─────────────────────────────────────────
        attempt(Stage::Filtered);
        let ctx = self.oracle_context();
        let (sections, mut anomalies) =
            relevance::label_sections(sections, self.config.relevance, &ctx).await;
        self.transition(filename, Stage::Filtered);

        // ── Step 5: Structured extraction ────────────────────────────────────
        attempt(Stage::Structured);
        let structured = structured::extract_candidates(&sections, &ctx).await;
        anomalies.extend(structured.anomalies);
        self.transition(filename, Stage::Structured);

        // ── Step 6: Aggregate, validate, score ───────────────────────────────
        attempt(Stage::Aggregated);
        let agg = aggregate::aggregate(&structured.candidates);
        let confidence = aggregate::confidence(&sections, &structured.candidates, &agg);

        let metadata = Metadata {
            processing_confidence: confidence,
            sections_found: sections.len(),
            relevant_sections: aggregate::relevant_counts(&sections),
            category_sources: agg.category_sources,
            processing_time_ms: started.elapsed().as_millis() as u64,
            pages: pages.len(),
            ocr_pages: pages.iter().filter(|p| p.ocr_used).count(),
            tables_found: pages.iter().map(|p| p.tables.len()).sum(),
            milestones_extracted: agg.milestones.len(),
            deliverables_extracted: agg.deliverables.len(),
            anomalies,
            validation_notes: agg.validation_notes,
            conflicts: agg.conflicts,
            ..Metadata::default()
        };
        let result = ExtractionResult {
            status: ExtractionStatus::Partial,
            milestones: agg.milestones,
            deliverables: agg.deliverables,
            payment_terms: agg.payment_terms,
            metadata,
        };
        self.transition(filename, Stage::Aggregated);

        Ok(RunOutput { result, markdown })
    }

    fn oracle_context(&self) -> OracleContext {
        OracleContext {
            oracle: Arc::clone(&self.oracle),
            limiter: Arc::clone(&self.limiter),
            policy: RetryPolicy::from_config(&self.config),
            concurrency: self.config.concurrency,
            progress: self.config.progress_callback.clone(),
        }
    }

    fn transition(&self, filename: &str, stage: Stage) {
        info!(document = filename, "stage → {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(filename, stage);
        }
    }
}

fn ensure_text(filename: &str, pages: &[PageBlock]) -> Result<(), SowError> {
    if pages.iter().any(PageBlock::has_content) {
        Ok(())
    } else {
        Err(SowError::NoExtractableText {
            filename: filename.to_string(),
            pages: pages.len(),
        })
    }
}

fn scan_options(config: &ExtractionConfig) -> ScanOptions {
    ScanOptions {
        password: config.password.clone(),
        min_native_chars: config.min_native_chars,
        max_rendered_pixels: config.max_rendered_pixels,
        layout: LayoutConfig::default(),
    }
}

/// Extract, normalise and segment `doc` without any oracle call.
///
/// Pages too thin for the native layer come back empty since OCR needs
/// the oracle.
pub async fn inspect(doc: &Document, config: &ExtractionConfig) -> Result<Inspection, SowError> {
    let extractor = PdfiumExtractor::new(
        scan_options(config),
        None,
        Arc::new(OracleLimiter::from_config(config)),
        RetryPolicy::from_config(config),
        config.concurrency,
    );
    let pages = extractor.extract(doc).await?;
    let markdown = normalize::normalize(doc.filename(), &pages);
    let sections = segment::segment(&markdown);
    Ok(Inspection {
        filename: doc.filename().to_string(),
        pages,
        markdown: markdown.text,
        sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(Stage::Aggregated.to_string(), "aggregated");
        assert_eq!(serde_json::to_string(&Stage::Failed).unwrap(), "\"failed\"");
    }

    #[test]
    fn blank_pages_have_no_text() {
        let pages = vec![PageBlock::unreadable(0), PageBlock::unreadable(1)];
        let err = ensure_text("scan.pdf", &pages).unwrap_err();
        assert!(matches!(err, SowError::NoExtractableText { pages: 2, .. }));

        let mut ok = pages.clone();
        ok[1].text = "PAYMENT TERMS".into();
        assert!(ensure_text("scan.pdf", &ok).is_ok());
    }
}
