//! Markdown normalisation: ordered [`PageBlock`]s → one [`MarkdownDocument`].
//!
//! ## Heading detection
//!
//! Native PDF text has no heading markup, so headings are inferred from three
//! cues, in order:
//!
//! 1. numbering (`1.`, `2.3`, `Section 2:`, `Article IV`, `Exhibit A`), with
//!    the level taken from the numbering depth;
//! 2. short ALL-CAPS lines such as `PAYMENT TERMS`;
//! 3. a font size markedly larger than the page's body size (the median line
//!    size), with the level taken from the ratio.
//!
//! Lines already written as markdown headings (OCR pages) are kept verbatim.
//! The rules are deliberately conservative: a missed heading only merges two
//! sections, while a false one splits a payment table from its title.

use crate::model::{MarkdownDocument, PageBlock, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Longest line that may still be read as a heading.
const MAX_HEADING_CHARS: usize = 80;
/// Numbered headings have short titles; longer text is a numbered clause.
const MAX_NUMBERED_TITLE_WORDS: usize = 8;

static RE_MD_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

static RE_NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}(?:\.\d{1,2}){0,3})\.?\s+(\S.*)$").unwrap());

static RE_LABELLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:section|article|exhibit|schedule|appendix|annex|attachment)\s+(?:\d{1,3}(?:\.\d{1,2})*|[IVXLC]{1,6}|(?-i:[A-Z]))\b(?:\s*[.:\-–]?\s+(?-i:[A-Z(]).*|[.:])?$",
    )
    .unwrap()
});

/// Join pages into a single markdown document.
pub fn normalize(filename: &str, pages: &[PageBlock]) -> MarkdownDocument {
    let mut out: Vec<String> = Vec::new();
    let mut headings = 0usize;

    for page in pages {
        if !out.is_empty() {
            out.push(String::new());
        }
        let lines: Vec<&str> = page.text.lines().collect();
        let sizes = (page.line_font_sizes.len() == lines.len()).then_some(&page.line_font_sizes);
        let body_size = sizes.map(|s| median(s)).unwrap_or(0.0);

        for (i, line) in lines.iter().enumerate() {
            for table in page.tables.iter().filter(|t| t.anchor_line == i) {
                push_table(&mut out, table);
            }
            let font_size = sizes.map(|s| s[i]).unwrap_or(0.0);
            let rendered = render_line(line, font_size, body_size);
            if rendered.starts_with('#') {
                headings += 1;
            }
            out.push(rendered);
        }
        for table in page.tables.iter().filter(|t| t.anchor_line >= lines.len()) {
            push_table(&mut out, table);
        }
    }

    let text = collapse_blank_runs(&out);
    debug!(
        "Normalised '{}': {} pages, {} headings, {} bytes",
        filename,
        pages.len(),
        headings,
        text.len()
    );
    MarkdownDocument {
        filename: filename.to_string(),
        text,
    }
}

/// Render one text line, promoting it to a markdown heading when it looks
/// like one.
fn render_line(line: &str, font_size: f32, body_size: f32) -> String {
    let trimmed = line.trim();
    if RE_MD_HEADING.is_match(trimmed) {
        return trimmed.to_string();
    }
    match heading_level(trimmed, font_size, body_size) {
        Some(level) => format!("{} {}", "#".repeat(level as usize), trimmed),
        None => line.trim_end().to_string(),
    }
}

/// Heading level for `line`, or `None` for body text.
pub fn heading_level(line: &str, font_size: f32, body_size: f32) -> Option<u8> {
    let chars = line.chars().count();
    if chars == 0 || chars > MAX_HEADING_CHARS || line.starts_with('|') {
        return None;
    }

    if let Some(caps) = RE_NUMBERED.captures(line) {
        let title = &caps[2];
        let words = title.split_whitespace().count();
        if words <= MAX_NUMBERED_TITLE_WORDS && !ends_like_sentence(title) && starts_upper(title) {
            let depth = caps[1].split('.').count() as u8;
            return Some((depth + 1).min(6));
        }
    }

    if RE_LABELLED.is_match(line) && !ends_like_sentence(line) {
        return Some(2);
    }

    if is_all_caps_title(line) {
        return Some(2);
    }

    if body_size > 0.0 && font_size > 0.0 && !ends_like_sentence(line) {
        let ratio = font_size / body_size;
        if ratio >= 1.5 {
            return Some(1);
        }
        if ratio >= 1.2 {
            return Some(2);
        }
    }

    None
}

fn ends_like_sentence(s: &str) -> bool {
    s.trim_end().ends_with(['.', ',', ';'])
}

fn starts_upper(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_uppercase())
}

fn is_all_caps_title(line: &str) -> bool {
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    let visible = line.chars().filter(|c| !c.is_whitespace()).count();
    letters >= 4
        && letters * 2 >= visible
        && line.chars().count() <= 60
        && line
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_uppercase())
}

fn median(values: &[f32]) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| *v > 0.0).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[sorted.len() / 2]
}

/// Render a table as a GFM pipe table surrounded by blank lines.
fn push_table(out: &mut Vec<String>, table: &Table) {
    let width = table.width();
    if width == 0 {
        return;
    }
    if out.last().is_some_and(|l| !l.is_empty()) {
        out.push(String::new());
    }
    for (i, row) in table.rows.iter().enumerate() {
        out.push(render_row(row, width));
        if i == 0 {
            out.push(format!("|{}", " --- |".repeat(width)));
        }
    }
    out.push(String::new());
}

fn render_row(row: &[String], width: usize) -> String {
    let mut line = String::from("|");
    for i in 0..width {
        let cell = row.get(i).map(String::as_str).unwrap_or("");
        let cell = cell.replace('\n', " ").replace('|', "\\|");
        line.push(' ');
        line.push_str(cell.trim());
        line.push_str(" |");
    }
    line
}

fn collapse_blank_runs(lines: &[String]) -> String {
    let mut text = String::new();
    let mut blank = true;
    for line in lines {
        let is_blank = line.trim().is_empty();
        if is_blank && blank {
            continue;
        }
        blank = is_blank;
        text.push_str(if is_blank { "" } else { line });
        text.push('\n');
    }
    while text.ends_with("\n\n") {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> PageBlock {
        PageBlock {
            text: text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn numbering_sets_level_from_depth() {
        assert_eq!(heading_level("1. Scope of Work", 0.0, 0.0), Some(2));
        assert_eq!(heading_level("2.3 Payment Schedule", 0.0, 0.0), Some(3));
        assert_eq!(heading_level("4.1.2 Acceptance", 0.0, 0.0), Some(4));
    }

    #[test]
    fn numbered_clauses_stay_body_text() {
        assert_eq!(
            heading_level("1. The Supplier shall deliver the report.", 0.0, 0.0),
            None
        );
        assert_eq!(heading_level("3 days after signature", 0.0, 0.0), None);
    }

    #[test]
    fn labelled_and_caps_headings() {
        assert_eq!(heading_level("Section 2: Deliverables", 0.0, 0.0), Some(2));
        assert_eq!(heading_level("Article IV", 0.0, 0.0), Some(2));
        assert_eq!(heading_level("Exhibit A - Fees", 0.0, 0.0), Some(2));
        assert_eq!(heading_level("Section 3 of this Agreement", 0.0, 0.0), None);
        assert_eq!(heading_level("PAYMENT TERMS", 0.0, 0.0), Some(2));
        assert_eq!(heading_level("USD 5,000", 0.0, 0.0), None);
        assert_eq!(heading_level("Payment is due net 30", 0.0, 0.0), None);
    }

    #[test]
    fn font_ratio_promotes_large_lines() {
        assert_eq!(heading_level("Project Overview", 18.0, 10.0), Some(1));
        assert_eq!(heading_level("Project Overview", 12.5, 10.0), Some(2));
        assert_eq!(heading_level("Project Overview", 10.0, 10.0), None);
    }

    #[test]
    fn keeps_existing_markdown_headings() {
        let doc = normalize("x.pdf", &[page("## Fees\nNet 30")]);
        assert_eq!(doc.text, "## Fees\nNet 30\n");
    }

    #[test]
    fn tables_render_below_their_anchor_with_escapes_and_padding() {
        let block = PageBlock {
            text: "PAYMENT TERMS\nSchedule:\nNet 30.".into(),
            tables: vec![Table {
                rows: vec![
                    vec!["Milestone".into(), "Date".into(), "Amount".into()],
                    vec!["Kickoff | PM".into(), "2024-01-15".into()],
                ],
                anchor_line: 2,
            }],
            ..Default::default()
        };
        let doc = normalize("x.pdf", &[block]);
        assert_eq!(
            doc.text,
            "## PAYMENT TERMS\nSchedule:\n\n| Milestone | Date | Amount |\n| --- | --- | --- |\n| Kickoff \\| PM | 2024-01-15 |  |\n\nNet 30.\n"
        );
    }

    #[test]
    fn pages_are_joined_in_order() {
        let mut second = page("2. Fees");
        second.page_index = 1;
        let doc = normalize("x.pdf", &[page("1. Scope\nBuild it."), second]);
        assert_eq!(doc.text, "## 1. Scope\nBuild it.\n\n## 2. Fees\n");
        assert_eq!(doc.filename, "x.pdf");
    }

    #[test]
    fn font_sizes_are_ignored_when_misaligned() {
        let block = PageBlock {
            text: "Overview\nbody".into(),
            line_font_sizes: vec![20.0],
            ..Default::default()
        };
        let doc = normalize("x.pdf", &[block]);
        assert_eq!(doc.text, "Overview\nbody\n");
    }
}
