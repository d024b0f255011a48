//! Batch extraction: many documents through bounded concurrent pipelines.
//!
//! ## Why a stream?
//!
//! A batch of contracts can take many minutes. Yielding each document as it
//! finishes lets the CLI write `<stem>.json` files and update its progress
//! bar immediately instead of holding every result in memory. Items arrive
//! in completion order; `index` gives the input position.
//!
//! Each pipeline owns its document exclusively. The only thing the workers
//! share is the extractor's [`crate::oracle::OracleLimiter`].

use crate::error::{PipelineFailure, SowError};
use crate::orchestrator::{RunOutput, SowExtractor};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{debug, info};

/// One finished document.
#[derive(Debug)]
pub struct BatchItem {
    /// Position in the input list.
    pub index: usize,
    pub path: PathBuf,
    pub outcome: Result<RunOutput, PipelineFailure>,
}

/// A boxed stream of finished documents.
pub type BatchStream = Pin<Box<dyn Stream<Item = BatchItem> + Send>>;

/// Run every path through `extractor`, at most `workers` at a time.
pub fn extract_batch(
    extractor: Arc<SowExtractor>,
    paths: Vec<PathBuf>,
    workers: usize,
    sync: bool,
) -> BatchStream {
    let workers = workers.max(1);
    info!("Batch: {} documents, {} workers", paths.len(), workers);
    stream::iter(paths.into_iter().enumerate())
        .map(move |(index, path)| {
            let extractor = Arc::clone(&extractor);
            async move {
                debug!("Batch: starting {}", path.display());
                let outcome = extractor.run_path(&path, sync).await;
                BatchItem {
                    index,
                    path,
                    outcome,
                }
            }
        })
        .buffer_unordered(workers)
        .boxed()
}

/// Expand `inputs` into a list of PDF files.
///
/// Directories contribute their `*.pdf` entries (not recursive), sorted by
/// name; files are taken as given.
pub async fn collect_pdfs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, SowError> {
    let mut files = Vec::new();
    for input in inputs {
        let meta = tokio::fs::metadata(input)
            .await
            .map_err(|_| SowError::FileNotFound {
                path: input.clone(),
            })?;
        if !meta.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut entries = tokio::fs::read_dir(input)
            .await
            .map_err(|e| SowError::Internal(format!("reading {}: {e}", input.display())))?;
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SowError::Internal(format!("reading {}: {e}", input.display())))?
        {
            let path = entry.path();
            if is_pdf_path(&path) {
                found.push(path);
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

fn is_pdf_path(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}
