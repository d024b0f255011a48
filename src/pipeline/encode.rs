//! Image encoding for the OCR fallback: `DynamicImage` → base64 PNG
//! wrapped in `ImageData`.
//!
//! Scanned contract pages are text on paper, so the raster is reduced to
//! 8-bit greyscale before encoding. That roughly thirds the upload size with
//! no loss of legibility. PNG stays lossless; JPEG artefacts around small
//! digits turn `$8,000` into `$6,000` often enough to matter.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page for the vision model.
///
/// `detail: "high"` keeps fine print (payment tables, footnotes) readable
/// on providers that tile images.
pub fn encode_for_ocr(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let grey = DynamicImage::ImageLuma8(img.to_luma8());
    let mut buf = Vec::new();
    grey.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
