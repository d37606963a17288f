//! Flat, group-labelled export of per-dimension summaries.
//!
//! The export is UTF-8 comma-delimited text with the header
//! `group,value,avg_time,delay_rate,n,note`. Tables appear in the order they
//! are supplied and keep their internal row order; [`parse_export`] reads the
//! text back into [`ExportRow`]s.

use std::io::Read;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{aggregate::SummaryRow, data::Dimension};

pub const EXPORT_HEADERS: [&str; 6] = ["group", "value", "avg_time", "delay_rate", "n", "note"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub group: String,
    pub value: String,
    pub avg_time: f64,
    pub delay_rate: f64,
    pub n: usize,
    #[serde(default)]
    pub note: String,
}

impl ExportRow {
    fn from_summary(dimension: Dimension, row: &SummaryRow) -> Self {
        Self {
            group: group_label(dimension),
            value: row.value.clone(),
            avg_time: row.avg_time,
            delay_rate: row.delay_rate,
            n: row.count,
            note: row.note().to_string(),
        }
    }
}

pub fn group_label(dimension: Dimension) -> String {
    format!("by_{}", dimension.as_str())
}

/// Concatenates `tables` into one flat list of rows.
pub fn flatten(tables: &[(Dimension, Vec<SummaryRow>)]) -> Vec<ExportRow> {
    tables
        .iter()
        .flat_map(|(dimension, rows)| {
            rows.iter()
                .map(move |row| ExportRow::from_summary(*dimension, row))
        })
        .collect()
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.4}")
    }
}

pub fn export(tables: &[(Dimension, Vec<SummaryRow>)]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b',')
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    writer
        .write_record(EXPORT_HEADERS)
        .context("Writing export header")?;
    for row in flatten(tables) {
        writer
            .write_record([
                row.group.as_str(),
                row.value.as_str(),
                format_number(row.avg_time).as_str(),
                format_number(row.delay_rate).as_str(),
                row.n.to_string().as_str(),
                row.note.as_str(),
            ])
            .with_context(|| format!("Writing export row for {} '{}'", row.group, row.value))?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing export buffer: {}", err.error()))
}

pub fn parse_export<R: Read>(reader: R) -> Result<Vec<ExportRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers().context("Reading export header")?.clone();
    let expected = &EXPORT_HEADERS[..5];
    if headers.len() < expected.len() || headers.iter().take(5).ne(expected.iter().copied()) {
        return Err(anyhow!(
            "Unexpected export header {:?}; expected {:?}",
            headers.iter().collect::<Vec<_>>(),
            EXPORT_HEADERS
        ));
    }
    reader
        .deserialize::<ExportRow>()
        .enumerate()
        .map(|(idx, row)| row.with_context(|| format!("Parsing export row {}", idx + 2)))
        .collect()
}
