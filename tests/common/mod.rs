//! Shared fixtures: a scripted oracle, a three-page SOW and sinks.

#![allow(dead_code)]

use async_trait::async_trait;
use sow_extract::error::{OracleError, SyncError};
use sow_extract::model::{PageBlock, Table};
use sow_extract::prompts::ExtractionTemplate;
use sow_extract::{Category, ExtractionConfig, Milestone, MilestoneSink, Oracle, Section};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type ClassifyFn = fn(&Section) -> Result<String, OracleError>;
type ExtractFn = fn(&Section, Category) -> Result<String, OracleError>;

/// Oracle whose answers are plain functions of the section.
pub struct ScriptedOracle {
    classify: ClassifyFn,
    extract: ExtractFn,
    /// Answers to correction retries; `extract` is reused when unset.
    corrected: Option<ExtractFn>,
    delay: Option<Duration>,
    pub classify_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(classify: ClassifyFn, extract: ExtractFn) -> Self {
        Self {
            classify,
            extract,
            corrected: None,
            delay: None,
            classify_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer correction retries with `corrected` instead.
    pub fn on_correction(mut self, corrected: ExtractFn) -> Self {
        self.corrected = Some(corrected);
        self
    }

    /// Payment section is relevant to milestones and payments; the rest is
    /// boilerplate.
    pub fn sow() -> Self {
        Self::new(classify_payment_section, extract_kickoff)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn classify(
        &self,
        section: &Section,
        _categories: &[Category],
    ) -> Result<String, OracleError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        (self.classify)(section)
    }

    async fn extract(
        &self,
        section: &Section,
        category: Category,
        _template: &ExtractionTemplate,
        correction: bool,
    ) -> Result<String, OracleError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match self.corrected {
            Some(corrected) if correction => corrected(section, category),
            _ => (self.extract)(section, category),
        }
    }
}

pub fn classify_payment_section(section: &Section) -> Result<String, OracleError> {
    let relevant = section.body.contains("Kickoff");
    Ok(format!(
        r#"{{"milestones": {relevant}, "deliverables": false, "payments": {relevant}}}"#
    ))
}

/// Only the payment section, and only for payment terms.
pub fn classify_payments_only(section: &Section) -> Result<String, OracleError> {
    let relevant = section.body.contains("Kickoff");
    Ok(format!(
        r#"{{"milestones": false, "deliverables": false, "payments": {relevant}}}"#
    ))
}

pub fn extract_kickoff(_section: &Section, category: Category) -> Result<String, OracleError> {
    let answer = match category {
        Category::Milestones => {
            r#"{"milestones": [{"name": "Kickoff", "description": "Project start", "due_date": "2024-01-15", "payment_amount": "$5,000"}]}"#
        }
        Category::Payments => {
            r#"Here you go:
```json
{"payment_terms": [{"payment_type": "milestone-based", "amount": "$5,000", "due_date": "2024-01-15", "related_milestone": "kickoff"}]}
```"#
        }
        Category::Deliverables => r#"{"deliverables": []}"#,
    };
    Ok(answer.to_string())
}

pub fn unparseable(_section: &Section) -> Result<String, OracleError> {
    Ok("It might be relevant, hard to say.".to_string())
}

pub fn prose_answer(_section: &Section, _category: Category) -> Result<String, OracleError> {
    Ok("The payment schedule is described in the table above.".to_string())
}

pub fn empty_answer(_section: &Section, category: Category) -> Result<String, OracleError> {
    Ok(format!(r#"{{"{}": []}}"#, category.result_key()))
}

pub fn transport_failure(_section: &Section, _category: Category) -> Result<String, OracleError> {
    Err(OracleError::Transport {
        detail: "connection reset".into(),
    })
}

/// A three-page SOW with a "PAYMENT TERMS" heading and one table.
pub fn sow_pages() -> Vec<PageBlock> {
    vec![
        page(0, "STATEMENT OF WORK\nThis SOW is entered into by Acme Corp and Globex."),
        PageBlock {
            page_index: 1,
            text: "PAYMENT TERMS\nFees are invoiced per milestone as follows.".into(),
            tables: vec![Table {
                rows: vec![
                    vec!["Milestone".into(), "Date".into(), "Amount".into()],
                    vec!["Kickoff".into(), "2024-01-15".into(), "$5,000".into()],
                ],
                anchor_line: 2,
            }],
            ..PageBlock::default()
        },
        page(2, "SIGNATURES\nAgreed and accepted by both parties."),
    ]
}

pub fn page(index: usize, text: &str) -> PageBlock {
    PageBlock {
        page_index: index,
        text: text.into(),
        ..PageBlock::default()
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fast_config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .retry_backoff_ms(1)
        .concurrency(4)
        .build()
        .unwrap()
}

/// Sink that rejects every milestone and remembers what it saw.
#[derive(Default)]
pub struct RejectingSink {
    pub seen: Mutex<Vec<String>>,
}

#[async_trait]
impl MilestoneSink for RejectingSink {
    async fn send(&self, milestone: &Milestone) -> Result<(), SyncError> {
        self.seen.lock().unwrap().push(milestone.name.clone());
        Err(SyncError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }
}

/// Smallest payload that passes the `%PDF` magic check.
pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n%fixture\n";
