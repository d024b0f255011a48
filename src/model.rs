//! Data carried between pipeline stages.
//!
//! Everything here lives for one pipeline run. The only value that leaves
//! the run is the final [`crate::output::ExtractionResult`] (and a read-only
//! projection of its milestones handed to the sync sink).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

// ── Extraction stage ─────────────────────────────────────────────────────

/// A table detected on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Row-major cells. Empty cells are empty strings, never omitted, so
    /// every row of a well-formed table has the header's width.
    pub rows: Vec<Vec<String>>,
    /// Number of page text lines that precede the table.
    pub anchor_line: usize,
}

impl Table {
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Text and tables recovered from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageBlock {
    /// 0-indexed page number.
    pub page_index: usize,
    /// Page text, one line per visual line, without the table rows.
    pub text: String,
    pub tables: Vec<Table>,
    /// Font size per line of `text` when the native layer exposes it;
    /// empty otherwise (OCR pages).
    pub line_font_sizes: Vec<f32>,
    pub ocr_used: bool,
}

impl PageBlock {
    /// A page from which nothing could be read.
    pub fn unreadable(page_index: usize) -> Self {
        Self {
            page_index,
            ocr_used: true,
            ..Self::default()
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || self.tables.iter().any(|t| !t.rows.is_empty())
    }
}

// ── Normalisation / segmentation ─────────────────────────────────────────

/// The whole document as one markdown string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkdownDocument {
    pub filename: String,
    pub text: String,
}

/// The three kinds of records the pipeline extracts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Milestones,
    Deliverables,
    Payments,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Milestones,
        Category::Deliverables,
        Category::Payments,
    ];

    /// Key of the array in the oracle's JSON answer and in the final result.
    pub fn result_key(self) -> &'static str {
        match self {
            Category::Milestones => "milestones",
            Category::Deliverables => "deliverables",
            Category::Payments => "payment_terms",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Milestones => "milestones",
            Category::Deliverables => "deliverables",
            Category::Payments => "payments",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relevance label of a section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "categories")]
pub enum Relevance {
    /// The filter has not run yet.
    #[default]
    Unknown,
    /// Subset of categories the section is relevant to; may be empty.
    Labeled(BTreeSet<Category>),
}

impl Relevance {
    pub fn all() -> Self {
        Relevance::Labeled(Category::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Relevance::Labeled(BTreeSet::new())
    }

    pub fn contains(&self, category: Category) -> bool {
        matches!(self, Relevance::Labeled(set) if set.contains(&category))
    }

    pub fn categories(&self) -> Vec<Category> {
        match self {
            Relevance::Unknown => Vec::new(),
            Relevance::Labeled(set) => set.iter().copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories().is_empty()
    }
}

/// A titled slice of the markdown document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Position in document order, starting at 0.
    pub ordinal: usize,
    /// `None` for the leading (or only) section that has no heading line.
    pub heading_level: Option<u8>,
    /// Byte range into [`MarkdownDocument::text`], heading line included.
    pub span: Range<usize>,
    /// Text after the heading line, trimmed.
    pub body: String,
    pub relevance: Relevance,
}

impl Section {
    pub fn is_blank(&self) -> bool {
        self.body.trim().is_empty() && self.heading_level.is_none()
    }
}

// ── Structured records ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub description: String,
    /// ISO-8601 date or `None`.
    pub due_date: Option<String>,
    /// Currency-prefixed, e.g. `"$5,000"`.
    pub payment_amount: Option<String>,
    pub payment_percentage: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub name: String,
    pub description: String,
    pub delivery_date: Option<String>,
    pub acceptance_criteria: Option<String>,
    /// Milestone name this deliverable belongs to. A lookup key, resolved
    /// against the milestone index at aggregation time.
    pub related_milestone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerm {
    /// `milestone-based`, `percentage`, `fixed`, `recurring` or `other`.
    pub payment_type: String,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub percentage: Option<String>,
    pub trigger: Option<String>,
    pub due_date: Option<String>,
    pub related_milestone: Option<String>,
    pub related_deliverable: Option<String>,
    pub description: Option<String>,
}

impl PaymentTerm {
    /// The label used to match duplicate payment terms.
    pub fn dedup_name(&self) -> &str {
        [
            self.related_milestone.as_deref(),
            self.trigger.as_deref(),
            self.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or(&self.payment_type)
    }
}

/// One parsed record, not yet deduplicated or validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateItem {
    Milestone(Milestone),
    Deliverable(Deliverable),
    Payment(PaymentTerm),
}

impl CandidateItem {
    pub fn category(&self) -> Category {
        match self {
            CandidateItem::Milestone(_) => Category::Milestones,
            CandidateItem::Deliverable(_) => Category::Deliverables,
            CandidateItem::Payment(_) => Category::Payments,
        }
    }

    /// `(name, date)` used for duplicate detection.
    pub fn dedup_fields(&self) -> (&str, Option<&str>) {
        match self {
            CandidateItem::Milestone(m) => (&m.name, m.due_date.as_deref()),
            CandidateItem::Deliverable(d) => (&d.name, d.delivery_date.as_deref()),
            CandidateItem::Payment(p) => (p.dedup_name(), p.due_date.as_deref()),
        }
    }

    /// Payment amount, when the record carries one.
    pub fn amount(&self) -> Option<&str> {
        match self {
            CandidateItem::Milestone(m) => m.payment_amount.as_deref(),
            CandidateItem::Deliverable(_) => None,
            CandidateItem::Payment(p) => p.amount.as_deref(),
        }
    }
}

/// A candidate tagged with the section it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCandidate {
    pub section_title: String,
    pub section_ordinal: usize,
    pub item: CandidateItem,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_all_contains_every_category() {
        let r = Relevance::all();
        for c in Category::ALL {
            assert!(r.contains(c));
        }
        assert!(!Relevance::Unknown.contains(Category::Payments));
        assert!(Relevance::none().is_empty());
    }

    #[test]
    fn payment_dedup_name_prefers_milestone_then_trigger() {
        let mut p = PaymentTerm {
            payment_type: "fixed".into(),
            trigger: Some("On signature".into()),
            ..Default::default()
        };
        assert_eq!(p.dedup_name(), "On signature");
        p.related_milestone = Some("Kickoff".into());
        assert_eq!(p.dedup_name(), "Kickoff");
        p.related_milestone = Some("  ".into());
        p.trigger = None;
        assert_eq!(p.dedup_name(), "fixed");
    }

    #[test]
    fn unreadable_page_is_flagged_as_ocr() {
        let p = PageBlock::unreadable(4);
        assert!(p.ocr_used);
        assert!(!p.has_content());
    }

    #[test]
    fn category_keys() {
        assert_eq!(Category::Payments.result_key(), "payment_terms");
        assert_eq!(Category::Payments.to_string(), "payments");
        let json = serde_json::to_string(&Category::Deliverables).unwrap();
        assert_eq!(json, "\"deliverables\"");
    }
}
