//! pdfium access: open the document once, read each page's text layer and
//! rasterise the pages that need OCR.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. `tokio::task::spawn_blocking` moves the work onto the
//! blocking pool so Tokio workers never stall while a 50-page contract is
//! parsed. Everything pdfium touches stays inside that one closure.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image size vision models read best.

use super::input::Document;
use super::layout::{self, Glyph, LayoutConfig, PageLayout};
use crate::error::SowError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Parameters for [`scan_document`].
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub password: Option<String>,
    /// Pages with fewer non-whitespace characters than this are rasterised.
    pub min_native_chars: usize,
    pub max_rendered_pixels: u32,
    pub layout: LayoutConfig,
}

/// What pdfium produced for one page.
#[derive(Debug)]
pub struct PageScan {
    pub page_index: usize,
    pub layout: PageLayout,
    /// `Some` when the native layer was too thin and the page was rendered
    /// for OCR; the inner `Err` carries the render failure.
    pub raster: Option<Result<DynamicImage, String>>,
}

/// Scan every page of `doc`. Runs inside `spawn_blocking`.
///
/// # Errors
/// Only whole-document failures: binding pdfium, corrupt file, password.
/// A page whose text layer or rendering fails is reported per page.
pub async fn scan_document(doc: &Document, opts: ScanOptions) -> Result<Vec<PageScan>, SowError> {
    let doc = doc.clone();
    tokio::task::spawn_blocking(move || scan_blocking(&doc, &opts))
        .await
        .map_err(|e| SowError::Internal(format!("Scan task panicked: {}", e)))?
}

fn scan_blocking(doc: &Document, opts: &ScanOptions) -> Result<Vec<PageScan>, SowError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| SowError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_byte_slice(doc.bytes(), opts.password.as_deref())
        .map_err(|e| classify_load_error(doc.filename(), e))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF '{}' loaded: {} pages", doc.filename(), total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(opts.max_rendered_pixels as i32)
        .set_maximum_height(opts.max_rendered_pixels as i32);

    let mut scans = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let opened = u16::try_from(idx)
            .map_err(|_| format!("page index {} exceeds the pdfium page range", idx))
            .and_then(|i| pages.get(i).map_err(|e| format!("{:?}", e)));
        let page = match opened {
            Ok(page) => page,
            Err(e) => {
                warn!("Page {}: cannot be opened: {}", idx + 1, e);
                scans.push(unopened_page(idx, e));
                continue;
            }
        };

        let glyphs = collect_glyphs(&page).unwrap_or_else(|e| {
            warn!("Page {}: text layer unreadable: {:?}", idx + 1, e);
            Vec::new()
        });
        let layout = layout::analyze(&glyphs, &opts.layout);
        let native_chars = native_char_count(&layout);
        debug!(
            "Page {}: {} glyphs, {} chars, {} tables",
            idx + 1,
            glyphs.len(),
            native_chars,
            layout.tables.len()
        );

        let raster = (native_chars < opts.min_native_chars).then(|| {
            page.render_with_config(&render_config)
                .map(|bitmap| bitmap.as_image())
                .map_err(|e| format!("{:?}", e))
        });
        if let Some(Ok(ref image)) = raster {
            debug!(
                "Page {}: rendered for OCR → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
        }

        scans.push(PageScan {
            page_index: idx,
            layout,
            raster,
        });
    }

    Ok(scans)
}

/// Scan for a page pdfium could not hand out; it reaches the extractor as
/// an empty OCR page.
fn unopened_page(page_index: usize, reason: String) -> PageScan {
    PageScan {
        page_index,
        layout: PageLayout::default(),
        raster: Some(Err(reason)),
    }
}

fn collect_glyphs(page: &PdfPage) -> Result<Vec<Glyph>, PdfiumError> {
    let text = page.text()?;
    let mut glyphs = Vec::new();
    for char_info in text.chars().iter() {
        let Some(ch) = char_info.unicode_string().and_then(|s| s.chars().next()) else {
            continue;
        };
        let Ok(bounds) = char_info.loose_bounds() else {
            continue;
        };
        glyphs.push(Glyph {
            ch,
            left: bounds.left().value,
            right: bounds.right().value,
            top: bounds.top().value,
            bottom: bounds.bottom().value,
            font_size: char_info.scaled_font_size().value,
        });
    }
    Ok(glyphs)
}

/// Non-whitespace characters recovered natively, tables included.
pub fn native_char_count(layout: &PageLayout) -> usize {
    let text: usize = layout
        .lines
        .iter()
        .map(|l| l.chars().filter(|c| !c.is_whitespace()).count())
        .sum();
    let cells: usize = layout
        .tables
        .iter()
        .flat_map(|t| t.rows.iter().flatten())
        .map(|c| c.chars().filter(|c| !c.is_whitespace()).count())
        .sum();
    text + cells
}

fn classify_load_error(filename: &str, e: PdfiumError) -> SowError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        SowError::PasswordRequired {
            filename: filename.to_string(),
        }
    } else {
        SowError::CorruptPdf {
            filename: filename.to_string(),
            detail: err_str,
        }
    }
}
