//! Page layout analysis: positioned glyphs → text lines → tables.
//!
//! This is the pure half of native extraction. [`super::render`] pulls
//! glyphs out of pdfium on a blocking thread; everything after that happens
//! here, so it can be unit-tested with synthetic glyphs.
//!
//! ## Stream-mode tables
//!
//! SOW payment schedules are usually drawn as plain text columns, often
//! without ruling lines, so tables are found from text alignment alone:
//!
//! 1. glyphs are grouped into lines by vertical position (tolerance relative
//!    to font size);
//! 2. each line is split into cells wherever the horizontal gap between two
//!    glyphs is much wider than a word space;
//! 3. a run of ≥ 2 consecutive multi-cell lines whose cells start at shared
//!    x positions becomes a table. Columns come from the widest row; missing
//!    cells become empty strings.

use crate::model::Table;
use tracing::debug;

/// One positioned character from the native text layer.
///
/// Coordinates are PDF user space: y grows upwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    pub font_size: f32,
}

impl Glyph {
    fn center_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

/// Tuning knobs for line grouping and table detection.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Glyphs whose centres differ by less than `font_size × factor` share a line.
    pub line_tolerance_factor: f32,
    /// A gap wider than `font_size × factor` starts a new cell.
    pub cell_gap_factor: f32,
    /// Lower bound on the cell gap, in points.
    pub min_cell_gap: f32,
    /// A gap wider than `font_size × factor` (but not a cell gap) is a space.
    pub space_gap_factor: f32,
    /// Cell starts within this many points of a column start are aligned.
    pub column_tolerance: f32,
    pub min_rows: usize,
    pub min_columns: usize,
    /// Above this many columns a "table" is almost always justified prose.
    pub max_columns: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            line_tolerance_factor: 0.5,
            cell_gap_factor: 1.6,
            min_cell_gap: 8.0,
            space_gap_factor: 0.15,
            column_tolerance: 6.0,
            min_rows: 2,
            min_columns: 2,
            max_columns: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    x: f32,
    text: String,
}

#[derive(Debug, Clone)]
struct Line {
    font_size: f32,
    cells: Vec<Cell>,
}

impl Line {
    fn text(&self) -> String {
        self.cells
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Text lines (tables removed) plus the tables found on a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub lines: Vec<String>,
    /// Average font size of each entry in `lines`.
    pub font_sizes: Vec<f32>,
    pub tables: Vec<Table>,
}

/// Analyse one page worth of glyphs.
pub fn analyze(glyphs: &[Glyph], config: &LayoutConfig) -> PageLayout {
    let lines = group_lines(glyphs, config);
    let mut layout = PageLayout::default();

    let mut i = 0;
    while i < lines.len() {
        if lines[i].cells.len() >= config.min_columns {
            let end = region_end(&lines, i, config);
            if let Some(table) = build_table(&lines[i..end], layout.lines.len(), config) {
                debug!(
                    "Table: {} rows × {} columns after line {}",
                    table.rows.len(),
                    table.width(),
                    table.anchor_line
                );
                layout.tables.push(table);
                i = end;
                continue;
            }
        }
        let text = lines[i].text();
        if !text.trim().is_empty() {
            layout.lines.push(text);
            layout.font_sizes.push(lines[i].font_size);
        }
        i += 1;
    }

    layout
}

/// Exclusive end of the run of multi-cell lines starting at `start`.
fn region_end(lines: &[Line], start: usize, config: &LayoutConfig) -> usize {
    let mut end = start;
    while end < lines.len() && lines[end].cells.len() >= config.min_columns {
        end += 1;
    }
    end
}

fn group_lines(glyphs: &[Glyph], config: &LayoutConfig) -> Vec<Line> {
    let mut visible: Vec<Glyph> = glyphs
        .iter()
        .copied()
        .filter(|g| !g.ch.is_whitespace() && !g.ch.is_control())
        .collect();
    if visible.is_empty() {
        return Vec::new();
    }

    visible.sort_by(|a, b| b.center_y().total_cmp(&a.center_y()));

    let mut grouped: Vec<Vec<Glyph>> = Vec::new();
    let mut anchor_y = f32::NAN;
    for g in visible {
        let tolerance = (g.font_size * config.line_tolerance_factor).max(1.5);
        match grouped.last_mut() {
            Some(line) if (anchor_y - g.center_y()).abs() <= tolerance => line.push(g),
            _ => {
                anchor_y = g.center_y();
                grouped.push(vec![g]);
            }
        }
    }

    grouped
        .into_iter()
        .map(|mut glyphs| {
            glyphs.sort_by(|a, b| a.left.total_cmp(&b.left));
            split_cells(&glyphs, config)
        })
        .collect()
}

fn split_cells(glyphs: &[Glyph], config: &LayoutConfig) -> Line {
    let font_size = glyphs.iter().map(|g| g.font_size).sum::<f32>() / glyphs.len() as f32;
    let cell_gap = (font_size * config.cell_gap_factor).max(config.min_cell_gap);
    let space_gap = font_size * config.space_gap_factor;

    let mut cells: Vec<Cell> = Vec::new();
    let mut prev_right = f32::NEG_INFINITY;
    for g in glyphs {
        let gap = g.left - prev_right;
        match cells.last_mut() {
            Some(cell) if gap <= cell_gap => {
                if gap > space_gap {
                    cell.text.push(' ');
                }
                cell.text.push(g.ch);
            }
            _ => cells.push(Cell {
                x: g.left,
                text: g.ch.to_string(),
            }),
        }
        prev_right = prev_right.max(g.right);
    }

    Line { font_size, cells }
}

fn build_table(region: &[Line], anchor_line: usize, config: &LayoutConfig) -> Option<Table> {
    if region.len() < config.min_rows {
        return None;
    }

    let widest = region.iter().max_by_key(|l| l.cells.len())?;
    let columns: Vec<f32> = widest.cells.iter().map(|c| c.x).collect();
    if columns.len() < config.min_columns || columns.len() > config.max_columns {
        return None;
    }

    let aligned_rows = region
        .iter()
        .filter(|line| {
            line.cells
                .iter()
                .filter(|c| {
                    columns
                        .iter()
                        .any(|x| (c.x - x).abs() <= config.column_tolerance)
                })
                .count()
                >= config.min_columns
        })
        .count();
    if aligned_rows < config.min_rows {
        return None;
    }

    let rows = region
        .iter()
        .map(|line| {
            let mut row = vec![String::new(); columns.len()];
            for cell in &line.cells {
                let col = column_for(cell.x, &columns, config.column_tolerance);
                if row[col].is_empty() {
                    row[col] = cell.text.clone();
                } else {
                    row[col].push(' ');
                    row[col].push_str(&cell.text);
                }
            }
            row
        })
        .collect();

    Some(Table { rows, anchor_line })
}

/// Index of the right-most column starting at or before `x` (with tolerance).
fn column_for(x: f32, columns: &[f32], tolerance: f32) -> usize {
    columns
        .iter()
        .rposition(|col| *col <= x + tolerance)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Lay out `text` as glyphs starting at `x` on baseline `y`.
    pub(crate) fn word(text: &str, x: f32, y: f32, size: f32) -> Vec<Glyph> {
        let advance = size * 0.5;
        text.chars()
            .enumerate()
            .map(|(i, ch)| {
                let left = x + i as f32 * advance;
                Glyph {
                    ch,
                    left,
                    right: left + advance * 0.9,
                    top: y + size * 0.8,
                    bottom: y,
                    font_size: size,
                }
            })
            .collect()
    }

    #[test]
    fn empty_page_has_no_lines() {
        let layout = analyze(&[], &LayoutConfig::default());
        assert!(layout.lines.is_empty());
        assert!(layout.tables.is_empty());
    }

    #[test]
    fn lines_come_out_top_to_bottom_with_spaces() {
        let mut glyphs = word("second", 72.0, 600.0, 10.0);
        glyphs.extend(word("first", 72.0, 700.0, 10.0));
        glyphs.extend(word("line", 72.0 + 6.0 * 5.0 + 3.0, 700.0, 10.0));
        let layout = analyze(&glyphs, &LayoutConfig::default());
        assert_eq!(layout.lines, vec!["first line", "second"]);
        assert_eq!(layout.font_sizes, vec![10.0, 10.0]);
    }

    #[test]
    fn aligned_columns_become_a_table() {
        let mut glyphs = word("PAYMENT TERMS", 72.0, 700.0, 14.0);
        for (y, cells) in [
            (650.0, ["Milestone", "Date", "Amount"]),
            (635.0, ["Kickoff", "2024-01-15", "$5,000"]),
        ] {
            glyphs.extend(word(cells[0], 72.0, y, 10.0));
            glyphs.extend(word(cells[1], 200.0, y, 10.0));
            glyphs.extend(word(cells[2], 320.0, y, 10.0));
        }
        glyphs.extend(word("Net 30 from invoice.", 72.0, 600.0, 10.0));

        let layout = analyze(&glyphs, &LayoutConfig::default());
        assert_eq!(layout.lines, vec!["PAYMENT TERMS", "Net 30 from invoice."]);
        assert_eq!(layout.tables.len(), 1);
        let table = &layout.tables[0];
        assert_eq!(table.anchor_line, 1);
        assert_eq!(
            table.rows,
            vec![
                vec!["Milestone", "Date", "Amount"],
                vec!["Kickoff", "2024-01-15", "$5,000"],
            ]
        );
    }

    #[test]
    fn missing_cells_are_empty_strings() {
        let mut glyphs = Vec::new();
        glyphs.extend(word("Phase", 72.0, 500.0, 10.0));
        glyphs.extend(word("Due", 200.0, 500.0, 10.0));
        glyphs.extend(word("Fee", 320.0, 500.0, 10.0));
        glyphs.extend(word("Design", 72.0, 485.0, 10.0));
        glyphs.extend(word("$1,000", 320.0, 485.0, 10.0));
        let layout = analyze(&glyphs, &LayoutConfig::default());
        assert_eq!(layout.tables.len(), 1);
        assert_eq!(layout.tables[0].rows[1], vec!["Design", "", "$1,000"]);
    }

    #[test]
    fn single_multi_cell_line_stays_text() {
        let mut glyphs = word("Client", 72.0, 500.0, 10.0);
        glyphs.extend(word("Acme Corp", 300.0, 500.0, 10.0));
        let layout = analyze(&glyphs, &LayoutConfig::default());
        assert!(layout.tables.is_empty());
        assert_eq!(layout.lines, vec!["Client Acme Corp"]);
    }
}
