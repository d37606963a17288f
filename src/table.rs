//! Plain-text tables for terminal output.
//!
//! Columns whose cells are all numeric (or `no data`) are right-aligned so
//! figures line up on the decimal point; everything else is left-aligned.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::data::parse_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    for width in &mut widths {
        *width = (*width).max(1);
    }

    let alignments = (0..column_count)
        .map(|idx| column_alignment(rows, idx))
        .collect::<Vec<_>>();
    let header_alignments = vec![Alignment::Left; column_count];

    let mut output = String::new();

    let header_line = format_row(headers, &widths, &header_alignments);
    let _ = writeln!(output, "{header_line}");

    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let separator_line = format_row(&separator_cells, &separator_widths, &header_alignments);
    let _ = writeln!(output, "{separator_line}");

    for row in rows {
        let row_line = format_row(row, &widths, &alignments);
        let _ = writeln!(output, "{row_line}");
    }

    output
}

/// Renders `title` underlined, followed by the table.
pub fn render_section(title: &str, headers: &[String], rows: &[Vec<String>]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{title}");
    let _ = writeln!(output, "{}", "=".repeat(display_width(title).max(3)));
    if rows.is_empty() {
        let _ = writeln!(output, "(no rows)");
    } else {
        output.push_str(&render_table(headers, rows));
    }
    output
}

pub fn column_alignment(rows: &[Vec<String>], column: usize) -> Alignment {
    let mut saw_number = false;
    for row in rows {
        let Some(cell) = row.get(column) else {
            continue;
        };
        let trimmed = cell.trim();
        if trimmed.is_empty() || trimmed == "no data" {
            continue;
        }
        let numeric = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if parse_number(numeric.trim_end_matches('%')).is_none() {
            return Alignment::Left;
        }
        saw_number = true;
    }
    if saw_number {
        Alignment::Right
    } else {
        Alignment::Left
    }
}

fn format_row(values: &[String], widths: &[usize], alignments: &[Alignment]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate() {
        if idx >= widths.len() {
            break;
        }
        let sanitized = sanitize_cell(value);
        let display = display_width(sanitized.as_ref());
        let padding = widths
            .get(idx)
            .copied()
            .unwrap_or_default()
            .saturating_sub(display);
        let cell = match alignments.get(idx).copied().unwrap_or(Alignment::Left) {
            Alignment::Left => format!("{}{}", sanitized, " ".repeat(padding)),
            Alignment::Right => format!("{}{}", " ".repeat(padding), sanitized),
        };
        cells.push(cell);
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // Skip ANSI escape sequence (e.g. \x1b[31m)
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
