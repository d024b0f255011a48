//! Text/table extraction: PDF bytes → one [`PageBlock`] per page.
//!
//! The native text layer is read first (see [`super::render`]). Pages whose
//! layer is too thin are rasterised and transcribed by the [`OcrEngine`],
//! concurrently across pages, then cleaned and split back into lines and
//! tables so both kinds of page look the same to the normaliser. A page
//! whose OCR is unavailable or fails keeps its thin native layer.

use super::encode::encode_for_ocr;
use super::input::Document;
use super::postprocess::{clean_ocr_text, split_pipe_tables};
use super::render::{scan_document, PageScan, ScanOptions};
use crate::error::SowError;
use crate::model::PageBlock;
use crate::oracle::{with_retries, OcrEngine, OracleLimiter, RetryPolicy};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of page blocks for the pipeline.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, doc: &Document) -> Result<Vec<PageBlock>, SowError>;
}

/// Pre-extracted pages, returned as-is for any document.
#[derive(Debug, Clone, Default)]
pub struct StaticPages(pub Vec<PageBlock>);

#[async_trait]
impl TextExtractor for StaticPages {
    async fn extract(&self, _doc: &Document) -> Result<Vec<PageBlock>, SowError> {
        Ok(self.0.clone())
    }
}

/// pdfium native pass with a vision-model OCR fallback.
pub struct PdfiumExtractor {
    scan: ScanOptions,
    /// `None` disables OCR: thin pages keep whatever native text they had.
    ocr: Option<Arc<dyn OcrEngine>>,
    limiter: Arc<OracleLimiter>,
    policy: RetryPolicy,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl PdfiumExtractor {
    pub fn new(
        scan: ScanOptions,
        ocr: Option<Arc<dyn OcrEngine>>,
        limiter: Arc<OracleLimiter>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            scan,
            ocr,
            limiter,
            policy,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Transcribe one rendered page. When OCR is off or fails, the thin
    /// native layer is kept instead of nothing.
    async fn ocr_page(&self, scan: PageScan, raster: Result<DynamicImage, String>) -> PageBlock {
        let page_index = scan.page_index;
        let Some(ocr) = self.ocr.as_ref() else {
            debug!("Page {}: no OCR engine, keeping native text", page_index + 1);
            return native_fallback(scan);
        };
        let image = match raster.and_then(|img| encode_for_ocr(&img).map_err(|e| e.to_string())) {
            Ok(image) => image,
            Err(e) => {
                warn!("Page {}: cannot be rendered for OCR: {}", page_index + 1, e);
                return native_fallback(scan);
            }
        };

        let label = format!("ocr page {}", page_index + 1);
        let result = with_retries(&label, self.policy, &self.limiter, || {
            let ocr = Arc::clone(ocr);
            let image = image.clone();
            async move { ocr.transcribe(page_index, image).await }
        })
        .await;

        match result {
            Ok(raw) => {
                let cleaned = clean_ocr_text(&raw);
                let (lines, tables) = split_pipe_tables(&cleaned);
                let block = PageBlock {
                    page_index,
                    text: lines.join("\n"),
                    tables,
                    line_font_sizes: Vec::new(),
                    ocr_used: true,
                };
                if block.has_content() {
                    block
                } else {
                    debug!("Page {}: OCR returned nothing, keeping native text", page_index + 1);
                    native_fallback(scan)
                }
            }
            Err(e) => {
                warn!("Page {}: OCR failed: {}", page_index + 1, e);
                native_fallback(scan)
            }
        }
    }

    /// Turn scans into page-ordered blocks, transcribing the rendered ones
    /// concurrently.
    async fn assemble(&self, filename: &str, scans: Vec<PageScan>) -> Vec<PageBlock> {
        let total = scans.len();
        let mut blocks = Vec::with_capacity(total);
        let mut pending = Vec::new();
        for mut scan in scans {
            match scan.raster.take() {
                None => blocks.push(native_block(scan)),
                Some(raster) => pending.push((scan, raster)),
            }
        }

        if !pending.is_empty() {
            info!("{}: {} of {} pages need OCR", filename, pending.len(), total);
            if let Some(ref cb) = self.progress {
                cb.on_units_start("ocr", pending.len());
            }
            let ocr_blocks: Vec<PageBlock> = stream::iter(pending)
                .map(|(scan, raster)| async move {
                    let block = self.ocr_page(scan, raster).await;
                    if let Some(ref cb) = self.progress {
                        cb.on_unit_complete("ocr", block.has_content());
                    }
                    block
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            blocks.extend(ocr_blocks);
        }

        blocks.sort_by_key(|b| b.page_index);
        blocks
    }
}

fn native_block(scan: PageScan) -> PageBlock {
    PageBlock {
        page_index: scan.page_index,
        text: scan.layout.lines.join("\n"),
        tables: scan.layout.tables,
        line_font_sizes: scan.layout.font_sizes,
        ocr_used: false,
    }
}

/// Native layer of a page that went to OCR; still flagged as an OCR page.
fn native_fallback(scan: PageScan) -> PageBlock {
    PageBlock {
        ocr_used: true,
        ..native_block(scan)
    }
}

#[async_trait]
impl TextExtractor for PdfiumExtractor {
    async fn extract(&self, doc: &Document) -> Result<Vec<PageBlock>, SowError> {
        let scans = scan_document(doc, self.scan.clone()).await?;
        Ok(self.assemble(doc.filename(), scans).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::pipeline::layout::{LayoutConfig, PageLayout};
    use edgequake_llm::ImageData;
    use std::time::Duration;

    /// Transcribes page N as "OCR page N"; refuses the pages in `fail`.
    /// Earlier pages answer later so completions arrive out of order.
    struct FakeOcr {
        fail: Vec<usize>,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn transcribe(&self, page_index: usize, _image: ImageData) -> Result<String, OracleError> {
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(page_index as u64 * 10))).await;
            if self.fail.contains(&page_index) {
                return Err(OracleError::Auth {
                    detail: "key rejected".into(),
                });
            }
            Ok(format!("OCR page {}", page_index + 1))
        }
    }

    fn extractor(ocr: Option<Arc<dyn OcrEngine>>) -> PdfiumExtractor {
        let scan = ScanOptions {
            password: None,
            min_native_chars: 20,
            max_rendered_pixels: 64,
            layout: LayoutConfig::default(),
        };
        let limiter = Arc::new(OracleLimiter::new(600, 4, Duration::from_secs(5)));
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        };
        PdfiumExtractor::new(scan, ocr, limiter, policy, 4)
    }

    fn scan(page_index: usize, lines: &[&str], rendered: bool) -> PageScan {
        PageScan {
            page_index,
            layout: PageLayout {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                font_sizes: vec![10.0; lines.len()],
                tables: vec![],
            },
            raster: rendered.then(|| Ok(DynamicImage::new_rgb8(4, 4))),
        }
    }

    fn scans() -> Vec<PageScan> {
        vec![
            scan(0, &[], true),
            scan(1, &["STATEMENT OF WORK between Acme and Globex"], false),
            scan(2, &["PAYMENT TERMS $5,000"], true),
            scan(3, &[], true),
        ]
    }

    #[tokio::test]
    async fn one_block_per_page_in_page_order() {
        let ocr: Arc<dyn OcrEngine> = Arc::new(FakeOcr { fail: vec![] });
        let blocks = extractor(Some(ocr)).assemble("a.pdf", scans()).await;

        let order: Vec<usize> = blocks.iter().map(|b| b.page_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        let ocr_flags: Vec<bool> = blocks.iter().map(|b| b.ocr_used).collect();
        assert_eq!(ocr_flags, vec![true, false, true, true]);
        assert_eq!(blocks[0].text, "OCR page 1");
        assert_eq!(blocks[1].text, "STATEMENT OF WORK between Acme and Globex");
        assert_eq!(blocks[3].text, "OCR page 4");
    }

    #[tokio::test]
    async fn failed_ocr_keeps_the_thin_native_layer() {
        let ocr: Arc<dyn OcrEngine> = Arc::new(FakeOcr { fail: vec![2, 3] });
        let blocks = extractor(Some(ocr)).assemble("a.pdf", scans()).await;

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].text, "OCR page 1");
        assert_eq!(blocks[2].text, "PAYMENT TERMS $5,000");
        assert!(blocks[2].ocr_used);
        assert!(!blocks[3].has_content());
        assert!(blocks[3].ocr_used);
    }

    #[tokio::test]
    async fn without_ocr_rendered_pages_fall_back_to_native_text() {
        let blocks = extractor(None).assemble("a.pdf", scans()).await;

        assert_eq!(blocks.len(), 4);
        assert!(!blocks[0].has_content());
        assert_eq!(blocks[2].text, "PAYMENT TERMS $5,000");
        assert!(blocks.iter().filter(|b| b.page_index != 1).all(|b| b.ocr_used));
    }

    #[tokio::test]
    async fn render_failure_falls_back_to_native_text() {
        let mut page = scan(0, &["Fees: $5,000"], false);
        page.raster = Some(Err("bitmap allocation failed".into()));
        let ocr: Arc<dyn OcrEngine> = Arc::new(FakeOcr { fail: vec![] });
        let blocks = extractor(Some(ocr)).assemble("a.pdf", vec![page]).await;

        assert_eq!(blocks[0].text, "Fees: $5,000");
        assert!(blocks[0].ocr_used);
    }

    #[tokio::test]
    async fn static_pages_ignore_the_document() {
        let pages = vec![PageBlock {
            page_index: 0,
            text: "PAYMENT TERMS".into(),
            ..Default::default()
        }];
        let doc = Document::from_bytes("a.pdf", b"%PDF-1.7".to_vec()).unwrap();
        let out = StaticPages(pages.clone()).extract(&doc).await.unwrap();
        assert_eq!(out, pages);
    }

    #[test]
    fn native_block_keeps_layout() {
        let scan = PageScan {
            page_index: 2,
            layout: PageLayout {
                lines: vec!["1. SCOPE".into(), "Build a portal.".into()],
                font_sizes: vec![14.0, 10.0],
                tables: vec![],
            },
            raster: None,
        };
        let block = native_block(scan);
        assert_eq!(block.page_index, 2);
        assert_eq!(block.text, "1. SCOPE\nBuild a portal.");
        assert_eq!(block.line_font_sizes, vec![14.0, 10.0]);
        assert!(!block.ocr_used);
    }
}
