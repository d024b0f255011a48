//! Post-processing: deterministic cleanup of OCR transcriptions.
//!
//! ## Why is post-processing necessary?
//!
//! The OCR fallback asks a vision model to transcribe a scanned page as
//! markdown. Even well-prompted models add artefacts that would confuse the
//! normaliser and segmenter downstream:
//!
//! - wrapping the answer in ` ```markdown ... ``` ` fences;
//! - Windows line endings and zero-width characters;
//! - `![figure](chart.png)` links for logos and signatures;
//! - "Page 3 of 12" footers that then look like headings;
//! - extra `| --- |` rows in the middle of a payment table.
//!
//! After cleanup, pipe tables are parsed back into [`Table`] rows so scanned
//! and native pages reach the normaliser in the same shape.
//!
//! ## Rule Order
//!
//! Fences go first so the remaining rules see the bare transcription, and
//! line endings are normalised before any line-based rule runs.

use crate::model::Table;
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw OCR transcription.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Drop image links, keeping alt text as plain text
/// 6. Drop page-number footers
/// 7. Collapse 3+ consecutive blank lines down to 1
pub fn clean_ocr_text(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = drop_image_links(&s);
    let s = drop_page_numbers(&s);
    collapse_blank_lines(s.trim())
}

/// Split cleaned OCR markdown into plain lines and pipe tables.
///
/// Each table is anchored after the plain lines that precede it. Separator
/// rows are dropped, `\|` escapes are unescaped, and ragged rows are padded
/// with empty cells to the widest row.
pub fn split_pipe_tables(input: &str) -> (Vec<String>, Vec<Table>) {
    let mut lines = Vec::new();
    let mut tables = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();

    let mut flush = |current: &mut Vec<Vec<String>>, lines: &Vec<String>| {
        if current.is_empty() {
            return;
        }
        let mut rows = std::mem::take(current);
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        tables.push(Table {
            rows,
            anchor_line: lines.len(),
        });
    };

    for line in input.lines() {
        if is_table_row(line) {
            if !is_separator_row(line) {
                current.push(parse_row(line));
            }
            continue;
        }
        flush(&mut current, &lines);
        lines.push(line.to_string());
    }
    flush(&mut current, &lines);

    (lines, tables)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Drop image links ─────────────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());

fn drop_image_links(input: &str) -> String {
    RE_IMAGE.replace_all(input, "$1").to_string()
}

// ── Rule 6: Drop page-number footers ─────────────────────────────────────────

static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:-\s*)?(?:page\s+)?\d{1,4}(?:\s*(?:of|/)\s*\d{1,4})?(?:\s*-)?\s*$")
        .unwrap()
});

fn drop_page_numbers(input: &str) -> String {
    input
        .lines()
        .filter(|line| !RE_PAGE_NUMBER.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 7: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Pipe-table helpers ───────────────────────────────────────────────────────

pub(crate) fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

pub(crate) fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Split `| a | b \| c |` into `["a", "b | c"]`.
fn parse_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

// ── Tests ────────────────────────────────────────────────────────────────────
