//! Type coercion, text normalization and imputation.
//!
//! [`clean`] builds a [`Dataset`] from a [`RawTable`] and a resolved
//! [`ColumnMapping`]:
//!
//! 1. numeric fields are coerced; unparseable cells become missing,
//! 2. categorical cells are trimmed and title-cased; placeholder tokens
//!    become missing,
//! 3. rows without a `delivery_time` are dropped,
//! 4. `agent_age` and `agent_rating` gaps take the median of the surviving
//!    rows, categorical gaps take the mode (or the unknown label).
//!
//! Cleaning the raw rendering of a cleaned dataset returns the same dataset.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    config::PipelineConfig,
    data::{Dataset, Record, parse_naive_date, parse_number, title_case},
    io_utils::RawTable,
    schema::{CanonicalField, ColumnMapping, FieldKind},
    stats,
};

/// Row/column counts before and after cleaning plus imputation tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub rows_before: usize,
    pub columns_before: usize,
    pub rows_after: usize,
    pub columns_after: usize,
    pub dropped_missing_delivery_time: usize,
    pub imputed: BTreeMap<String, usize>,
    pub unparsed_dates: usize,
}

impl CleanReport {
    pub fn rows_removed(&self) -> usize {
        self.rows_before.saturating_sub(self.rows_after)
    }
}

#[derive(Debug, Default)]
struct PartialRecord {
    delivery_time: Option<f64>,
    agent_age: Option<f64>,
    agent_rating: Option<f64>,
    categorical: [Option<String>; 5],
    order_date: Option<NaiveDate>,
}

const CATEGORICAL_FIELDS: [CanonicalField; 5] = [
    CanonicalField::Traffic,
    CanonicalField::Weather,
    CanonicalField::Vehicle,
    CanonicalField::Area,
    CanonicalField::Category,
];

/// Normalizes one categorical cell; `None` means missing.
pub fn normalize_category(raw: &str, config: &PipelineConfig) -> Option<String> {
    let trimmed = raw.trim();
    if config.is_missing_token(trimmed) {
        return None;
    }
    Some(title_case(trimmed))
}

fn coerce_numeric(field: CanonicalField, raw: &str) -> Option<f64> {
    let value = parse_number(raw)?;
    match field {
        CanonicalField::AgentAge if value < 0.0 => None,
        _ => Some(value),
    }
}

pub fn clean(table: &RawTable, mapping: &ColumnMapping, config: &PipelineConfig) -> (Dataset, CleanReport) {
    let mut report = CleanReport {
        rows_before: table.row_count(),
        columns_before: table.column_count(),
        ..CleanReport::default()
    };

    let mut partials = Vec::with_capacity(table.row_count());
    for row in 0..table.row_count() {
        let mut partial = PartialRecord::default();
        for (field, column) in mapping.iter() {
            let raw = table.cell(row, column);
            match (field, field.kind()) {
                (CanonicalField::DeliveryTime, _) => partial.delivery_time = coerce_numeric(field, raw),
                (CanonicalField::AgentAge, _) => partial.agent_age = coerce_numeric(field, raw),
                (CanonicalField::AgentRating, _) => partial.agent_rating = coerce_numeric(field, raw),
                (_, FieldKind::Date) => {
                    let trimmed = raw.trim();
                    if !config.is_missing_token(trimmed) {
                        match parse_naive_date(trimmed) {
                            Ok(date) => partial.order_date = Some(date),
                            Err(_) => report.unparsed_dates += 1,
                        }
                    }
                }
                (_, FieldKind::Categorical) => {
                    if let Some(slot) = CATEGORICAL_FIELDS.iter().position(|f| *f == field) {
                        partial.categorical[slot] = normalize_category(raw, config);
                    }
                }
                (_, FieldKind::Numeric) => {}
            }
        }
        partials.push(partial);
    }

    let before_drop = partials.len();
    let timed = partials
        .into_iter()
        .filter_map(|p| p.delivery_time.map(|minutes| (minutes, p)))
        .collect::<Vec<_>>();
    report.dropped_missing_delivery_time = before_drop - timed.len();
    if report.dropped_missing_delivery_time > 0 {
        info!(
            "Dropped {} row(s) without a delivery time",
            report.dropped_missing_delivery_time
        );
    }

    let age_fill = numeric_fill(CanonicalField::AgentAge, timed.iter().map(|(_, p)| p.agent_age));
    let rating_fill = numeric_fill(
        CanonicalField::AgentRating,
        timed.iter().map(|(_, p)| p.agent_rating),
    );
    let category_fills = CATEGORICAL_FIELDS
        .iter()
        .enumerate()
        .map(|(slot, field)| {
            mode(timed.iter().filter_map(|(_, p)| p.categorical[slot].as_deref())).unwrap_or_else(
                || {
                    if !timed.is_empty() {
                        warn!(
                            "Column '{}' has no values; imputing '{}'",
                            field, config.unknown_label
                        );
                    }
                    config.unknown_label.clone()
                },
            )
        })
        .collect::<Vec<_>>();

    let mut imputed: BTreeMap<String, usize> = BTreeMap::new();
    let mut records = Vec::with_capacity(timed.len());
    for (delivery_time, partial) in timed {
        let agent_age = partial.agent_age.unwrap_or_else(|| {
            bump(&mut imputed, CanonicalField::AgentAge);
            age_fill
        });
        let agent_rating = partial.agent_rating.unwrap_or_else(|| {
            bump(&mut imputed, CanonicalField::AgentRating);
            rating_fill
        });
        let mut categorical = partial.categorical;
        for (slot, value) in categorical.iter_mut().enumerate() {
            if value.is_none() {
                bump(&mut imputed, CATEGORICAL_FIELDS[slot]);
                *value = Some(category_fills[slot].clone());
            }
        }
        let [traffic, weather, vehicle, area, category] = categorical.map(Option::unwrap_or_default);
        records.push(Record {
            delivery_time,
            traffic,
            weather,
            vehicle,
            agent_age,
            agent_rating,
            area,
            category,
            order_date: partial.order_date,
        });
    }

    for (field, count) in &imputed {
        debug!("Imputed {count} missing value(s) in '{field}'");
    }
    report.imputed = imputed;
    report.rows_after = records.len();
    report.columns_after = mapping.len();
    (Dataset::new(records), report)
}

fn bump(imputed: &mut BTreeMap<String, usize>, field: CanonicalField) {
    *imputed.entry(field.as_str().to_string()).or_insert(0) += 1;
}

fn numeric_fill<I>(field: CanonicalField, values: I) -> f64
where
    I: Iterator<Item = Option<f64>>,
{
    let mut rows = 0usize;
    let observed = values.inspect(|_| rows += 1).flatten().collect::<Vec<_>>();
    stats::median(&observed).unwrap_or_else(|| {
        if rows > 0 {
            warn!("Column '{field}' has no numeric values; imputing 0");
        }
        0.0
    })
}

/// Most frequent value; ties resolve to the lexicographically smallest.
fn mode<'a, I>(values: I) -> Option<String>
where
    I: Iterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value.to_string())
}
