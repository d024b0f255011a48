//! Prompt templates for the three oracle calls: OCR, relevance and
//! structured extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing what the model is asked to do
//!    means editing exactly one place.
//!
//! 2. **Testability**: unit tests inspect prompts directly (placeholders
//!    filled, example JSON valid) without calling a model.

use crate::model::{Category, Section};

/// System prompt for transcribing a scanned SOW page.
pub const OCR_SYSTEM_PROMPT: &str = r#"You transcribe scanned pages of business contracts (Statements of Work) into Markdown.

Rules:
1. Transcribe ALL text exactly as printed, in reading order. Do not summarise or correct figures, dates or amounts.
2. Mark headings with #, ## or ### according to their visual importance.
3. Render every table as a GFM pipe table with a header row. Keep empty cells empty.
4. Ignore page numbers, running headers/footers, logos and signatures.
5. Output ONLY the Markdown. No code fences, no commentary."#;

/// System prompt for section relevance classification.
pub const RELEVANCE_SYSTEM_PROMPT: &str = r#"You classify one section of a Statement of Work (SOW).

Answer three yes/no questions about the section:
- "milestones": does it define project milestones, phases, schedules or due dates?
- "deliverables": does it define deliverables, work products, reports or acceptance criteria?
- "payments": does it define payment amounts, percentages, invoicing or payment schedules?

Return ONLY a JSON object with exactly these three boolean keys, for example:
{"milestones": true, "deliverables": false, "payments": true}"#;

/// System prompt shared by every extraction call.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract structured records from Statement of Work (SOW) sections.

Rules:
- Use EXACT values from the text. Never invent names, dates or amounts.
- Dates must be ISO-8601 (YYYY-MM-DD). If no date is given, use null.
- Amounts keep their currency symbol as written, e.g. "$5,000".
- If a field is not present in the text, use null.
- If the section contains no matching records, return an empty array.
- Return ONLY a JSON object, no prose and no code fences."#;

/// Appended to the user message when the previous answer did not parse.
pub const CORRECTION_SUFFIX: &str = "\n\nYour previous answer was not valid JSON. Return valid JSON only: a single JSON object with the key shown above and an array value. No markdown, no explanations.";

/// Cap on section text sent in one call; longer sections are truncated.
pub const MAX_SECTION_CHARS: usize = 24_000;

const EXAMPLE_SOW: &str = r#"## 4. PROJECT SCHEDULE AND PAYMENTS
The Supplier shall deliver the Requirements Report by 2024-02-01 for
acceptance by the Client's project lead. Phase 1 (Discovery) completes on
2024-02-15 and is invoiced at $12,000 (30% of the fees). Phase 2 (Build)
completes on 2024-05-31 and is invoiced at $28,000 (70% of the fees).
Invoices are payable within 30 days.

| Milestone | Date | Amount |
| --- | --- | --- |
| Phase 1 - Discovery | 2024-02-15 | $12,000 |
| Phase 2 - Build | 2024-05-31 | $28,000 |"#;

/// A fixed one-shot prompt for one category.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionTemplate {
    pub category: Category,
    /// Field list and meaning for this category.
    pub schema: &'static str,
    /// Gold answer for [`EXAMPLE_SOW`].
    pub example_output: &'static str,
}

const MILESTONES_TEMPLATE: ExtractionTemplate = ExtractionTemplate {
    category: Category::Milestones,
    schema: r#"Extract every milestone or project phase. Each record:
{"name": string, "description": string, "due_date": "YYYY-MM-DD" or null, "payment_amount": string or null, "payment_percentage": string or null}"#,
    example_output: r#"{"milestones": [
  {"name": "Phase 1 - Discovery", "description": "Discovery phase", "due_date": "2024-02-15", "payment_amount": "$12,000", "payment_percentage": "30%"},
  {"name": "Phase 2 - Build", "description": "Build phase", "due_date": "2024-05-31", "payment_amount": "$28,000", "payment_percentage": "70%"}
]}"#,
};

const DELIVERABLES_TEMPLATE: ExtractionTemplate = ExtractionTemplate {
    category: Category::Deliverables,
    schema: r#"Extract every deliverable, report, artifact or work product. Each record:
{"name": string, "description": string, "delivery_date": "YYYY-MM-DD" or null, "acceptance_criteria": string or null, "related_milestone": string or null}"#,
    example_output: r#"{"deliverables": [
  {"name": "Requirements Report", "description": "Report delivered by the Supplier", "delivery_date": "2024-02-01", "acceptance_criteria": "Acceptance by the Client's project lead", "related_milestone": "Phase 1 - Discovery"}
]}"#,
};

const PAYMENTS_TEMPLATE: ExtractionTemplate = ExtractionTemplate {
    category: Category::Payments,
    schema: r#"Extract every payment term. Each record:
{"payment_type": "milestone-based" | "percentage" | "fixed" | "recurring" | "other", "amount": string or null, "currency": ISO-4217 code or null, "percentage": string or null, "trigger": string or null, "due_date": "YYYY-MM-DD" or null, "related_milestone": string or null, "related_deliverable": string or null, "description": string or null}"#,
    example_output: r#"{"payment_terms": [
  {"payment_type": "milestone-based", "amount": "$12,000", "currency": "USD", "percentage": "30%", "trigger": "Completion of Phase 1 - Discovery", "due_date": "2024-02-15", "related_milestone": "Phase 1 - Discovery", "related_deliverable": null, "description": "Payable within 30 days of invoice"},
  {"payment_type": "milestone-based", "amount": "$28,000", "currency": "USD", "percentage": "70%", "trigger": "Completion of Phase 2 - Build", "due_date": "2024-05-31", "related_milestone": "Phase 2 - Build", "related_deliverable": null, "description": "Payable within 30 days of invoice"}
]}"#,
};

impl ExtractionTemplate {
    pub fn for_category(category: Category) -> &'static ExtractionTemplate {
        match category {
            Category::Milestones => &MILESTONES_TEMPLATE,
            Category::Deliverables => &DELIVERABLES_TEMPLATE,
            Category::Payments => &PAYMENTS_TEMPLATE,
        }
    }

    /// Build the user message for `section`.
    pub fn render(&self, section: &Section, correction: bool) -> String {
        let mut prompt = format!(
            "{schema}\n\nReturn a JSON object of the form {{\"{key}\": [ ... ]}}.\n\n\
             ### Example section\n{example}\n\n### Example answer\n{answer}\n\n\
             ### Section to extract: {title}\n{body}",
            schema = self.schema,
            key = self.category.result_key(),
            example = EXAMPLE_SOW,
            answer = self.example_output,
            title = section.title,
            body = truncate_chars(&section.body, MAX_SECTION_CHARS),
        );
        if correction {
            prompt.push_str(CORRECTION_SUFFIX);
        }
        prompt
    }
}

/// Build the user message for relevance classification.
pub fn relevance_user_prompt(section: &Section, categories: &[Category]) -> String {
    let wanted = categories
        .iter()
        .map(|c| format!("\"{}\"", c.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Keys to answer: {wanted}\n\n### Section: {}\n{}",
        section.title,
        truncate_chars(&section.body, MAX_SECTION_CHARS)
    )
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
