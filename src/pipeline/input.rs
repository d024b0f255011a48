//! Input resolution: turn a path, raw upload or base64 payload into a
//! validated [`Document`].
//!
//! ## Why validate up front?
//!
//! pdfium reports a non-PDF as a generic load failure deep inside a blocking
//! task. Checking the `%PDF` magic bytes before the pipeline starts gives the
//! caller a precise input error (HTTP 400) instead of a vague internal one.

use crate::error::SowError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Raw PDF bytes plus the name they arrived under.
///
/// Immutable once built; cloning shares the byte buffer.
#[derive(Clone)]
pub struct Document {
    filename: String,
    bytes: Arc<[u8]>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Document {
    /// Validate an in-memory payload.
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SowError> {
        let filename = filename.into();
        if bytes.is_empty() {
            return Err(SowError::EmptyDocument { filename });
        }
        if !bytes.starts_with(PDF_MAGIC) {
            let magic = bytes.iter().take(4).copied().collect();
            return Err(SowError::NotAPdf { filename, magic });
        }
        debug!("Accepted '{}' ({} bytes)", filename, bytes.len());
        Ok(Self {
            filename,
            bytes: bytes.into(),
        })
    }

    /// Decode a base64 `file_content` field (standard alphabet, padding and
    /// surrounding whitespace tolerated).
    pub fn from_base64(filename: impl Into<String>, encoded: &str) -> Result<Self, SowError> {
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let cleaned = cleaned
            .split_once(";base64,")
            .map(|(_, data)| data.to_string())
            .unwrap_or(cleaned);
        let bytes = STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| SowError::InvalidBase64 {
                detail: e.to_string(),
            })?;
        Self::from_bytes(filename, bytes)
    }

    /// Read and validate a local file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SowError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => SowError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => SowError::FileNotFound {
                path: path.to_path_buf(),
            },
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(filename, bytes)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Filename without the `.pdf` extension, used for output files.
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Upload endpoints accept only names ending in `.pdf` (any case).
pub fn has_pdf_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_payload() {
        let err = Document::from_bytes("a.pdf", vec![]).unwrap_err();
        assert!(matches!(err, SowError::EmptyDocument { .. }));
    }

    #[test]
    fn rejects_non_pdf_magic() {
        let err = Document::from_bytes("a.pdf", b"PK\x03\x04zip".to_vec()).unwrap_err();
        match err {
            SowError::NotAPdf { magic, .. } => assert_eq!(magic, b"PK\x03\x04".to_vec()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_base64_with_data_uri_prefix() {
        let encoded = STANDARD.encode(b"%PDF-1.7\n%%EOF");
        let doc =
            Document::from_base64("sow.pdf", &format!("data:application/pdf;base64,{encoded}\n"))
                .unwrap();
        assert_eq!(doc.filename(), "sow.pdf");
        assert_eq!(doc.stem(), "sow");
        assert!(doc.bytes().starts_with(b"%PDF"));
    }

    #[test]
    fn invalid_base64_is_input_error() {
        let err = Document::from_base64("sow.pdf", "not*base64!").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Input);
    }

    #[test]
    fn pdf_extension_check() {
        assert!(has_pdf_extension("SOW.PDF"));
        assert!(has_pdf_extension("dir/contract.pdf"));
        assert!(!has_pdf_extension("contract.docx"));
        assert!(!has_pdf_extension("pdf"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = Document::from_path("/definitely/not/here.pdf").await.unwrap_err();
        assert!(matches!(err, SowError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.pdf");
        std::fs::write(&path, b"%PDF-1.4 body").unwrap();
        let doc = Document::from_path(&path).await.unwrap();
        assert_eq!(doc.filename(), "contract.pdf");
        assert_eq!(doc.len(), 13);
    }
}
