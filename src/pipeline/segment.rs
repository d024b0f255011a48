//! Section segmentation: markdown → titled [`Section`]s.
//!
//! Every markdown heading line starts a section that runs up to the next
//! heading. Spans are byte ranges into the document and tile it exactly, so
//! `sections.map(|s| &text[s.span])` concatenates back to the input.

use crate::model::{MarkdownDocument, Relevance, Section};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})[ \t]+(.*?)[ \t]*#*[ \t]*$").unwrap());

struct Heading {
    start: usize,
    body_start: usize,
    level: u8,
    title: String,
}

/// Split `doc` into sections in document order.
pub fn segment(doc: &MarkdownDocument) -> Vec<Section> {
    let text = doc.text.as_str();
    let headings = find_headings(text);

    if headings.is_empty() {
        debug!("'{}': no headings, one section", doc.filename);
        return vec![Section {
            title: doc.filename.clone(),
            ordinal: 0,
            heading_level: None,
            span: 0..text.len(),
            body: text.trim().to_string(),
            relevance: Relevance::Unknown,
        }];
    }

    let mut sections = Vec::with_capacity(headings.len() + 1);
    let first_start = headings[0].start;
    let leading = &text[..first_start];
    let has_leading = !leading.trim().is_empty();
    if has_leading {
        sections.push(Section {
            title: doc.filename.clone(),
            ordinal: 0,
            heading_level: None,
            span: 0..first_start,
            body: leading.trim().to_string(),
            relevance: Relevance::Unknown,
        });
    }

    for (i, heading) in headings.iter().enumerate() {
        // Blank lead-in text is folded into the first heading's span.
        let start = if i == 0 && !has_leading { 0 } else { heading.start };
        let end = headings.get(i + 1).map(|h| h.start).unwrap_or(text.len());
        sections.push(Section {
            title: heading.title.clone(),
            ordinal: sections.len(),
            heading_level: Some(heading.level),
            span: start..end,
            body: text[heading.body_start.min(end)..end].trim().to_string(),
            relevance: Relevance::Unknown,
        });
    }

    debug!("'{}': {} sections", doc.filename, sections.len());
    sections
}

fn find_headings(text: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let Some(caps) = RE_HEADING.captures(line.trim_end_matches(['\n', '\r'])) else {
            continue;
        };
        let title = caps[2].trim();
        if title.is_empty() {
            continue;
        }
        headings.push(Heading {
            start,
            body_start: offset,
            level: caps[1].len() as u8,
            title: title.to_string(),
        });
    }
    headings
}
