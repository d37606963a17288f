//! Secondary analyses behind the dashboard's supporting charts and the
//! data-quality report.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::{
    data::Dimension,
    derive::DerivedDataset,
    stats::{self, Describe, HistogramBin, Trendline},
};

pub const DEFAULT_HISTOGRAM_BINS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub dimension: Dimension,
    pub value: String,
    pub count: usize,
}

/// Occurrences of each value of `dimension`, most frequent first.
pub fn value_counts(dataset: &DerivedDataset, dimension: Dimension) -> Vec<ValueCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in &dataset.records {
        *counts.entry(record.dimension_value(dimension)).or_insert(0) += 1;
    }
    let mut items = counts.into_iter().collect::<Vec<_>>();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    items
        .into_iter()
        .map(|(value, count)| ValueCount {
            dimension,
            value: value.to_string(),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericProfile {
    pub field: &'static str,
    pub summary: Option<Describe>,
}

/// Describe tables for `delivery_time`, `agent_age` and `agent_rating`.
pub fn numeric_profiles(dataset: &DerivedDataset) -> Vec<NumericProfile> {
    let columns: [(&'static str, fn(&crate::derive::FeaturedRecord) -> f64); 3] = [
        ("delivery_time", |r| r.record.delivery_time),
        ("agent_age", |r| r.record.agent_age),
        ("agent_rating", |r| r.record.agent_rating),
    ];
    columns
        .iter()
        .map(|&(field, extract)| {
            let values = dataset.records.iter().map(extract).collect::<Vec<_>>();
            NumericProfile {
                field,
                summary: stats::describe(&values),
            }
        })
        .collect()
}

pub fn delivery_time_histogram(dataset: &DerivedDataset, bins: usize) -> Vec<HistogramBin> {
    let times = dataset
        .records
        .iter()
        .map(|r| r.record.delivery_time)
        .collect::<Vec<_>>();
    stats::histogram(&times, bins)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxSummary {
    pub value: String,
    pub summary: Describe,
}

/// Delivery-time distribution per value of `dimension`, ordered by value.
pub fn box_summaries(dataset: &DerivedDataset, dimension: Dimension) -> Vec<BoxSummary> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in &dataset.records {
        groups
            .entry(record.dimension_value(dimension))
            .or_default()
            .push(record.record.delivery_time);
    }
    groups
        .into_iter()
        .filter_map(|(value, times)| {
            stats::describe(&times).map(|summary| BoxSummary {
                value: value.to_string(),
                summary,
            })
        })
        .collect()
}

/// Least-squares fit of delivery time on agent rating.
pub fn rating_trendline(dataset: &DerivedDataset) -> Option<Trendline> {
    let points = dataset
        .records
        .iter()
        .map(|r| (r.record.agent_rating, r.record.delivery_time))
        .collect::<Vec<_>>();
    stats::ols(&points)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub month: String,
    pub avg_time: f64,
    pub count: usize,
}

/// Mean delivery time per calendar month; records without a date are skipped.
pub fn monthly_trend(dataset: &DerivedDataset) -> Vec<MonthlyPoint> {
    let mut months: BTreeMap<(i32, u32), (f64, usize)> = BTreeMap::new();
    for record in &dataset.records {
        if let Some(date) = record.record.order_date {
            let entry = months.entry(month_key(date)).or_insert((0.0, 0));
            entry.0 += record.record.delivery_time;
            entry.1 += 1;
        }
    }
    months
        .into_iter()
        .map(|((year, month), (sum, count))| MonthlyPoint {
            month: format!("{year:04}-{month:02}"),
            avg_time: sum / count as f64,
            count,
        })
        .collect()
}

fn month_key(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}
