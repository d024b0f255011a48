//! CLI binary for sow-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs documents and writes results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sow_extract::output::write_atomic;
use sow_extract::server::{self, AppState};
use sow_extract::{
    collect_pdfs, extract_batch, inspect, Document, ExtractionConfig, ExtractionProgressCallback,
    ProgressCallback, RelevanceStrategy, RunOutput, SowExtractor, Stage, SyncConfig,
};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner for a single document: shows the current stage and, during
/// oracle fan-outs, how many units are done.
struct CliProgressCallback {
    bar: ProgressBar,
    done: AtomicUsize,
    total: AtomicUsize,
    failed_units: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            failed_units: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_stage(&self, _filename: &str, stage: Stage) {
        if stage != Stage::Ingested && stage != Stage::Failed {
            self.bar
                .println(format!("  {} {}", green("✓"), dim(stage.as_str())));
        }
        self.bar.set_prefix(stage.as_str().to_string());
        self.bar.set_message("");
    }

    fn on_units_start(&self, label: &str, total: usize) {
        self.done.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.bar.set_prefix(label.to_string());
        self.bar.set_message(format!("0/{total}"));
    }

    fn on_unit_complete(&self, _label: &str, ok: bool) {
        if !ok {
            self.failed_units.fetch_add(1, Ordering::SeqCst);
        }
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        self.bar.set_message(format!("{done}/{total}"));
    }

    fn on_finished(&self, filename: &str, error: Option<&str>) {
        self.bar.finish_and_clear();
        let failed = self.failed_units.load(Ordering::SeqCst);
        match error {
            None if failed == 0 => eprintln!("{} {}", green("✔"), bold(filename)),
            None => eprintln!(
                "{} {}  ({} oracle calls degraded)",
                cyan("⚠"),
                bold(filename),
                red(&failed.to_string())
            ),
            Some(e) => eprintln!("{} {}  {}", red("✘"), bold(filename), red(e)),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one SOW (JSON on stdout)
  sow-extract extract contract.pdf

  # Write the result and the normalised markdown to files
  sow-extract extract contract.pdf -o contract.json --markdown contract.md

  # Extract and push milestones to TargetProcess
  sow-extract extract contract.pdf --sync

  # A folder of SOWs, four at a time
  sow-extract batch ./sows --out-dir ./results --workers 4

  # HTTP service for the CRM integration
  sow-extract serve --port 8000

  # Look at text, tables and sections without any LLM call
  sow-extract inspect contract.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY              OpenAI API key
  ANTHROPIC_API_KEY           Anthropic API key
  GEMINI_API_KEY              Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL             Override model ID
  TARGETPROCESS_DOMAIN        TargetProcess base URL (enables --sync)
  TARGETPROCESS_ACCESS_TOKEN  TargetProcess access token
  PDFIUM_LIB_PATH             Path to an existing libpdfium, skips auto-download
  RUST_LOG                    Log filter, overrides --verbose/--quiet
"#;

/// Extract milestones, deliverables and payment terms from SOW PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "sow-extract",
    version,
    about = "Extract milestones, deliverables and payment terms from Statement-of-Work PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SOW_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract one document.
    Extract {
        /// SOW PDF file.
        pdf: PathBuf,

        /// Write the JSON result here instead of stdout.
        #[arg(short, long, env = "SOW_OUTPUT")]
        output: Option<PathBuf>,

        /// Post extracted milestones to TargetProcess.
        #[arg(long)]
        sync: bool,

        /// Also save the normalised markdown.
        #[arg(long, value_name = "FILE")]
        markdown: Option<PathBuf>,

        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Extract every PDF in the given directories and files.
    Batch {
        /// PDF files or directories containing them.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for `<stem>.json` and `<stem>.md` results.
        #[arg(long, env = "SOW_OUT_DIR")]
        out_dir: PathBuf,

        /// Documents processed at the same time.
        #[arg(short, long, env = "SOW_WORKERS", default_value_t = 2)]
        workers: usize,

        /// Post extracted milestones to TargetProcess.
        #[arg(long)]
        sync: bool,

        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "SOW_HOST", default_value = "0.0.0.0")]
        host: String,

        #[arg(long, env = "SOW_PORT", default_value_t = 8000)]
        port: u16,

        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Print extracted markdown and sections; no LLM calls.
    Inspect {
        pdf: PathBuf,

        /// Print the full inspection as JSON.
        #[arg(long)]
        json: bool,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "SOW_PASSWORD")]
        password: Option<String>,
    },
}

/// Flags shared by every command that calls the oracle.
#[derive(Args, Debug, Clone)]
struct OracleArgs {
    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Concurrent oracle calls within one document.
    #[arg(short, long, env = "SOW_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Attempts per oracle call, first try included (1-3).
    #[arg(long, env = "SOW_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Per oracle call timeout in seconds.
    #[arg(long, env = "SOW_ORACLE_TIMEOUT", default_value_t = 60)]
    oracle_timeout: u64,

    /// Whole-document timeout in seconds.
    #[arg(long, env = "SOW_DOCUMENT_TIMEOUT", default_value_t = 600)]
    document_timeout: u64,

    /// Oracle requests per minute, shared by all documents.
    #[arg(long, env = "SOW_REQUESTS_PER_MINUTE", default_value_t = 120)]
    requests_per_minute: u32,

    /// Section classification: oracle or keywords.
    #[arg(long, env = "SOW_RELEVANCE", default_value = "oracle")]
    relevance: RelevanceStrategy,

    /// Confidence needed for a `success` status (0-1).
    #[arg(long, env = "SOW_REVIEW_THRESHOLD", default_value_t = 0.5)]
    review_threshold: f64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SOW_PASSWORD")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers `extract`; library INFO logs would tear it.
    let show_progress = !cli.quiet && matches!(cli.command, Command::Extract { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    ensure_pdfium(cli.quiet)?;

    match cli.command {
        Command::Extract {
            pdf,
            output,
            sync,
            markdown,
            oracle,
        } => {
            let progress: Option<ProgressCallback> = if show_progress && !cli.verbose {
                Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let config = build_config(&oracle, progress)?;
            run_extract(config, &pdf, output, sync, markdown, cli.quiet).await
        }
        Command::Batch {
            inputs,
            out_dir,
            workers,
            sync,
            oracle,
        } => {
            let config = build_config(&oracle, None)?;
            run_batch(config, &inputs, &out_dir, workers, sync, cli.quiet).await
        }
        Command::Serve { host, port, oracle } => {
            let config = build_config(&oracle, None)?;
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("Invalid listen address '{host}:{port}'"))?;
            let extractor = build_extractor(config, true)?;
            server::serve(addr, AppState::new(Arc::new(extractor)))
                .await
                .context("HTTP server failed")
        }
        Command::Inspect {
            pdf,
            json,
            password,
        } => run_inspect(&pdf, json, password).await,
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

async fn run_extract(
    config: ExtractionConfig,
    pdf: &Path,
    output: Option<PathBuf>,
    sync: bool,
    markdown: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let extractor = build_extractor(config, sync)?;
    let run = extractor
        .run_path(pdf, sync)
        .await
        .with_context(|| format!("Extraction of {} failed", pdf.display()))?;

    let json = serde_json::to_string_pretty(&run.result).context("Failed to serialise result")?;
    match output {
        Some(ref path) => write_atomic(path, json.as_bytes())
            .await
            .context("Failed to write result")?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .and_then(|_| handle.write_all(b"\n"))
                .context("Failed to write to stdout")?;
        }
    }
    if let Some(ref path) = markdown {
        write_atomic(path, run.markdown.text.as_bytes())
            .await
            .context("Failed to write markdown")?;
    }

    if !quiet {
        let m = &run.result.metadata;
        eprintln!(
            "   {} milestones  {} deliverables  {} payment terms  {}  {}ms",
            bold(&run.result.milestones.len().to_string()),
            bold(&run.result.deliverables.len().to_string()),
            bold(&run.result.payment_terms.len().to_string()),
            dim(&format!("confidence {:.2}", m.processing_confidence)),
            m.processing_time_ms,
        );
    }
    Ok(())
}

async fn run_batch(
    config: ExtractionConfig,
    inputs: &[PathBuf],
    out_dir: &Path,
    workers: usize,
    sync: bool,
    quiet: bool,
) -> Result<()> {
    let files = collect_pdfs(inputs).await.context("Failed to list inputs")?;
    if files.is_empty() {
        anyhow::bail!("No PDF files found in the given inputs");
    }
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let extractor = Arc::new(build_extractor(config, sync)?);
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(files.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    };

    let started = Instant::now();
    let total = files.len();
    let mut succeeded = 0usize;
    let mut stream = extract_batch(extractor, files, workers, sync);
    while let Some(item) = stream.next().await {
        let stem = item
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("document-{}", item.index));
        match item.outcome {
            Ok(run) => {
                write_run(out_dir, &stem, &run).await?;
                succeeded += 1;
                bar.println(format!(
                    "  {} {:<40} {}",
                    green("✓"),
                    stem,
                    dim(&format!(
                        "{} milestones, confidence {:.2}",
                        run.result.milestones.len(),
                        run.result.metadata.processing_confidence
                    ))
                ));
            }
            Err(failure) => {
                let body = serde_json::json!({
                    "status": "failed",
                    "error": failure.message,
                    "category": failure.category,
                    "stage": failure.stage,
                });
                let path = out_dir.join(format!("{stem}.error.json"));
                write_atomic(&path, serde_json::to_string_pretty(&body)?.as_bytes())
                    .await
                    .context("Failed to write error report")?;
                bar.println(format!("  {} {:<40} {}", red("✗"), stem, red(&failure.message)));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if !quiet {
        let failed = total - succeeded;
        eprintln!(
            "{}  {}/{} documents  {:.1}s  →  {}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            succeeded,
            total,
            started.elapsed().as_secs_f64(),
            bold(&out_dir.display().to_string()),
        );
    }
    Ok(())
}

async fn write_run(out_dir: &Path, stem: &str, run: &RunOutput) -> Result<()> {
    let json = serde_json::to_string_pretty(&run.result).context("Failed to serialise result")?;
    write_atomic(out_dir.join(format!("{stem}.json")), json.as_bytes())
        .await
        .context("Failed to write result")?;
    write_atomic(out_dir.join(format!("{stem}.md")), run.markdown.text.as_bytes())
        .await
        .context("Failed to write markdown")?;
    Ok(())
}

async fn run_inspect(pdf: &Path, json: bool, password: Option<String>) -> Result<()> {
    let mut config = ExtractionConfig::default();
    config.password = password;
    let doc = Document::from_path(pdf)
        .await
        .with_context(|| format!("Failed to read {}", pdf.display()))?;
    let inspection = inspect(&doc, &config).await.context("Failed to inspect PDF")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&inspection).context("Failed to serialise inspection")?
        );
        return Ok(());
    }

    let native = inspection.pages.iter().filter(|p| p.has_content()).count();
    let tables: usize = inspection.pages.iter().map(|p| p.tables.len()).sum();
    println!("File:         {}", inspection.filename);
    println!("Pages:        {} ({} with native text)", inspection.pages.len(), native);
    println!("Tables:       {}", tables);
    println!("Sections:     {}", inspection.sections.len());
    for section in &inspection.sections {
        let indent = "  ".repeat(section.heading_level.unwrap_or(1) as usize);
        println!(
            "{indent}{:>3}  {}  {}",
            section.ordinal,
            section.title,
            dim(&format!("{} bytes", section.span.len()))
        );
    }
    println!();
    println!("{}", inspection.markdown);
    Ok(())
}

// ── Setup helpers ────────────────────────────────────────────────────────────

/// Map CLI args to `ExtractionConfig`.
fn build_config(args: &OracleArgs, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .concurrency(args.concurrency)
        .max_attempts(args.max_attempts)
        .oracle_timeout_secs(args.oracle_timeout)
        .document_timeout_secs(args.document_timeout)
        .requests_per_minute(args.requests_per_minute)
        .relevance(args.relevance)
        .review_threshold(args.review_threshold);

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Resolve the provider and, when a sync may be requested, the TargetProcess
/// credentials.
fn build_extractor(config: ExtractionConfig, sync: bool) -> Result<SowExtractor> {
    let sync_config = SyncConfig::from_env();
    if sync && sync_config.is_none() {
        warn!(
            "{} / {} not set; milestone sync will be skipped",
            SyncConfig::DOMAIN_VAR,
            SyncConfig::TOKEN_VAR
        );
    }
    SowExtractor::from_config(config, sync_config).context("Failed to set up the extractor")
}

/// Make sure a pdfium library is available before any document is opened.
///
/// The first run downloads it (~30 MB) into the pdfium-auto cache; later
/// runs only check the path.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}
