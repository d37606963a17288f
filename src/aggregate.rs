//! Grouped summaries, the two-dimensional pivot, and headline KPIs.
//!
//! Summaries are recomputed from the filtered dataset on every request and
//! sorted deterministically, so the same records always produce the same
//! rows regardless of input order.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    str::FromStr,
};

use anyhow::anyhow;
use serde::Serialize;

use crate::{
    config::DEFAULT_LOW_VOLUME_THRESHOLD,
    data::Dimension,
    derive::{DerivedDataset, FeaturedRecord},
    stats,
};

pub const LOW_VOLUME_NOTE: &str = "Low volume";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub dimension: Dimension,
    pub value: String,
    pub avg_time: f64,
    pub delay_rate: f64,
    pub count: usize,
    pub low_volume: bool,
}

impl SummaryRow {
    pub fn note(&self) -> &'static str {
        if self.low_volume { LOW_VOLUME_NOTE } else { "" }
    }
}

/// Row order of a summary table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryOrder {
    /// Delay rate descending, then mean time descending.
    #[default]
    DelayRate,
    /// Mean delivery time descending.
    SlowestFirst,
    /// Mean delivery time ascending.
    FastestFirst,
    /// Record count descending.
    Volume,
}

impl FromStr for SummaryOrder {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delay-rate" | "delay_rate" => Ok(SummaryOrder::DelayRate),
            "slowest" | "slowest-first" => Ok(SummaryOrder::SlowestFirst),
            "fastest" | "fastest-first" => Ok(SummaryOrder::FastestFirst),
            "volume" | "count" => Ok(SummaryOrder::Volume),
            other => Err(anyhow!(
                "Unknown summary order '{other}'. Expected delay-rate, slowest, fastest, or volume"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregator {
    pub low_volume_threshold: usize,
    pub order: SummaryOrder,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            low_volume_threshold: DEFAULT_LOW_VOLUME_THRESHOLD,
            order: SummaryOrder::default(),
        }
    }
}

#[derive(Default)]
struct GroupAccumulator {
    time_sum: f64,
    delayed: usize,
    count: usize,
}

impl GroupAccumulator {
    fn ingest(&mut self, record: &FeaturedRecord) {
        self.time_sum += record.record.delivery_time;
        self.delayed += usize::from(record.delay_flag);
        self.count += 1;
    }

    fn avg_time(&self) -> f64 {
        self.time_sum / self.count as f64
    }

    fn delay_rate(&self) -> f64 {
        self.delayed as f64 / self.count as f64 * 100.0
    }
}

impl Aggregator {
    pub fn new(low_volume_threshold: usize, order: SummaryOrder) -> Self {
        Self {
            low_volume_threshold,
            order,
        }
    }

    /// One row per value of `dimension` present in `dataset`.
    pub fn summarize(&self, dataset: &DerivedDataset, dimension: Dimension) -> Vec<SummaryRow> {
        let mut groups: HashMap<&str, GroupAccumulator> = HashMap::new();
        for record in &dataset.records {
            groups
                .entry(record.dimension_value(dimension))
                .or_default()
                .ingest(record);
        }
        let mut rows = groups
            .into_iter()
            .map(|(value, acc)| SummaryRow {
                dimension,
                value: value.to_string(),
                avg_time: acc.avg_time(),
                delay_rate: acc.delay_rate(),
                count: acc.count,
                low_volume: acc.count < self.low_volume_threshold,
            })
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| self.compare(a, b));
        rows
    }

    /// Summaries for every filterable dimension, in export order.
    pub fn summarize_all(&self, dataset: &DerivedDataset) -> Vec<(Dimension, Vec<SummaryRow>)> {
        Dimension::CATEGORICAL
            .iter()
            .map(|dimension| (*dimension, self.summarize(dataset, *dimension)))
            .collect()
    }

    fn compare(&self, a: &SummaryRow, b: &SummaryRow) -> Ordering {
        let primary = match self.order {
            SummaryOrder::DelayRate => b
                .delay_rate
                .total_cmp(&a.delay_rate)
                .then_with(|| b.avg_time.total_cmp(&a.avg_time)),
            SummaryOrder::SlowestFirst => b.avg_time.total_cmp(&a.avg_time),
            SummaryOrder::FastestFirst => a.avg_time.total_cmp(&b.avg_time),
            SummaryOrder::Volume => b.count.cmp(&a.count),
        };
        primary.then_with(|| a.value.cmp(&b.value))
    }
}

/// Summary of `dataset` by `dimension` with the default aggregator.
pub fn summarize(dataset: &DerivedDataset, dimension: Dimension) -> Vec<SummaryRow> {
    Aggregator::default().summarize(dataset, dimension)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PivotMetric {
    #[default]
    DelayRate,
    AvgTime,
}

impl FromStr for PivotMetric {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "delay-rate" | "delay_rate" => Ok(PivotMetric::DelayRate),
            "avg-time" | "avg_time" => Ok(PivotMetric::AvgTime),
            other => Err(anyhow!(
                "Unknown pivot metric '{other}'. Expected delay-rate or avg-time"
            )),
        }
    }
}

/// Dense row × column table. Cells without records hold `0.0`; `counts`
/// tells an empty cell apart from a genuine zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTable {
    pub row_dimension: Dimension,
    pub column_dimension: Dimension,
    pub metric: PivotMetric,
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
    pub counts: Vec<Vec<usize>>,
}

impl PivotTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: &str, column: &str) -> Option<f64> {
        let r = self.rows.iter().position(|v| v == row)?;
        let c = self.columns.iter().position(|v| v == column)?;
        Some(self.values[r][c])
    }

    pub fn count(&self, row: &str, column: &str) -> Option<usize> {
        let r = self.rows.iter().position(|v| v == row)?;
        let c = self.columns.iter().position(|v| v == column)?;
        Some(self.counts[r][c])
    }
}

pub fn pivot(
    dataset: &DerivedDataset,
    row_dimension: Dimension,
    column_dimension: Dimension,
    metric: PivotMetric,
) -> PivotTable {
    let mut cells: BTreeMap<(&str, &str), GroupAccumulator> = BTreeMap::new();
    let mut row_keys = BTreeSet::new();
    let mut column_keys = BTreeSet::new();
    for record in &dataset.records {
        let row = record.dimension_value(row_dimension);
        let column = record.dimension_value(column_dimension);
        row_keys.insert(row);
        column_keys.insert(column);
        cells.entry((row, column)).or_default().ingest(record);
    }
    let mut values = Vec::with_capacity(row_keys.len());
    let mut counts = Vec::with_capacity(row_keys.len());
    for row in &row_keys {
        let mut value_row = Vec::with_capacity(column_keys.len());
        let mut count_row = Vec::with_capacity(column_keys.len());
        for column in &column_keys {
            match cells.get(&(*row, *column)) {
                Some(acc) => {
                    value_row.push(match metric {
                        PivotMetric::DelayRate => acc.delay_rate(),
                        PivotMetric::AvgTime => acc.avg_time(),
                    });
                    count_row.push(acc.count);
                }
                None => {
                    value_row.push(0.0);
                    count_row.push(0);
                }
            }
        }
        values.push(value_row);
        counts.push(count_row);
    }
    PivotTable {
        row_dimension,
        column_dimension,
        metric,
        rows: row_keys.into_iter().map(str::to_string).collect(),
        columns: column_keys.into_iter().map(str::to_string).collect(),
        values,
        counts,
    }
}

/// Headline figures; `None` marks a metric without data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Kpis {
    pub avg_time: Option<f64>,
    pub delay_rate: Option<f64>,
    pub total: usize,
    pub avg_rating: Option<f64>,
}

impl Kpis {
    pub fn compute(dataset: &DerivedDataset) -> Self {
        let times = dataset
            .records
            .iter()
            .map(|r| r.record.delivery_time)
            .collect::<Vec<_>>();
        let flags = dataset
            .records
            .iter()
            .map(|r| if r.delay_flag { 100.0 } else { 0.0 })
            .collect::<Vec<_>>();
        let ratings = dataset
            .records
            .iter()
            .map(|r| r.record.agent_rating)
            .collect::<Vec<_>>();
        Self {
            avg_time: stats::mean(&times),
            delay_rate: stats::mean(&flags),
            total: dataset.len(),
            avg_rating: stats::mean(&ratings),
        }
    }
}

/// Filtered KPIs next to their unfiltered baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KpiComparison {
    pub current: Kpis,
    pub overall: Kpis,
}

impl KpiComparison {
    pub fn new(current: &DerivedDataset, overall: &DerivedDataset) -> Self {
        Self {
            current: Kpis::compute(current),
            overall: Kpis::compute(overall),
        }
    }

    pub fn avg_time_delta(&self) -> Option<f64> {
        delta(self.current.avg_time, self.overall.avg_time)
    }

    pub fn delay_rate_delta(&self) -> Option<f64> {
        delta(self.current.delay_rate, self.overall.delay_rate)
    }

    pub fn total_delta(&self) -> i64 {
        self.current.total as i64 - self.overall.total as i64
    }

    pub fn avg_rating_delta(&self) -> Option<f64> {
        delta(self.current.avg_rating, self.overall.avg_rating)
    }
}

fn delta(current: Option<f64>, overall: Option<f64>) -> Option<f64> {
    Some(current? - overall?)
}

impl fmt::Display for Kpis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg time {} min, delay rate {}%, {} deliveries, avg rating {}",
            crate::data::display_metric(self.avg_time, 1),
            crate::data::display_metric(self.delay_rate, 1),
            self.total,
            crate::data::display_metric(self.avg_rating, 2)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AgeBins,
        data::{Dataset, Record},
        derive::{DelayPolicy, derive_features},
    };

    fn record(delivery_time: f64, area: &str, category: &str) -> Record {
        Record {
            delivery_time,
            traffic: "Low".into(),
            weather: "Sunny".into(),
            vehicle: "Bike".into(),
            agent_age: 30.0,
            agent_rating: 4.0,
            area: area.into(),
            category: category.into(),
            order_date: None,
        }
    }

    fn derived(records: Vec<Record>, sla: f64) -> DerivedDataset {
        derive_features(
            &Dataset::new(records),
            DelayPolicy::FixedSla(sla),
            &AgeBins::default(),
        )
        .expect("derive")
    }

    #[test]
    fn concrete_sla_scenario_yields_forty_percent() {
        let ds = derived(
            [10.0, 20.0, 30.0, 40.0, 100.0]
                .iter()
                .map(|t| record(*t, "Urban", "Food"))
                .collect(),
            35.0,
        );
        let rows = summarize(&ds, Dimension::Area);
        assert_eq!(rows.len(), 1);
        assert!((rows[0].delay_rate - 40.0).abs() < 1e-9);
        assert!((rows[0].avg_time - 40.0).abs() < 1e-9);
        assert_eq!(rows[0].count, 5);
        assert!(rows[0].low_volume);
        assert_eq!(rows[0].note(), LOW_VOLUME_NOTE);
    }

    #[test]
    fn rows_sort_by_delay_rate_then_mean_time() {
        let ds = derived(
            vec![
                record(50.0, "Metro", "Food"),
                record(10.0, "Metro", "Food"),
                record(60.0, "Urban", "Food"),
                record(12.0, "Urban", "Food"),
                record(45.0, "Rural", "Food"),
            ],
            40.0,
        );
        let values = summarize(&ds, Dimension::Area)
            .into_iter()
            .map(|r| r.value)
            .collect::<Vec<_>>();
        assert_eq!(values, vec!["Rural", "Urban", "Metro"]);
    }

    #[test]
    fn ordering_ignores_input_order() {
        let mut records = vec![
            record(50.0, "B", "Food"),
            record(50.0, "A", "Food"),
            record(20.0, "C", "Food"),
        ];
        let forward = summarize(&derived(records.clone(), 30.0), Dimension::Area);
        records.reverse();
        let backward = summarize(&derived(records, 30.0), Dimension::Area);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].value, "A");
    }

    #[test]
    fn counts_sum_to_dataset_size() {
        let ds = derived(
            (0..50)
                .map(|i| record(i as f64, ["A", "B", "C"][i % 3], "Food"))
                .collect(),
            25.0,
        );
        for dimension in Dimension::CATEGORICAL {
            let total: usize = summarize(&ds, dimension).iter().map(|r| r.count).sum();
            assert_eq!(total, ds.len());
        }
        let rows = summarize(&ds, Dimension::Area);
        assert!(rows.iter().all(|r| !r.low_volume == (r.count >= 20)));
    }

    #[test]
    fn volume_order_sorts_by_count() {
        let ds = derived(
            vec![
                record(10.0, "A", "Food"),
                record(10.0, "B", "Food"),
                record(10.0, "B", "Food"),
            ],
            30.0,
        );
        let rows = Aggregator::new(20, SummaryOrder::Volume).summarize(&ds, Dimension::Area);
        assert_eq!(rows[0].value, "B");
    }

    #[test]
    fn pivot_fills_missing_cells_with_zero() {
        let ds = derived(
            vec![
                record(50.0, "Urban", "Food"),
                record(10.0, "Urban", "Toys"),
                record(60.0, "Metro", "Food"),
            ],
            30.0,
        );
        let table = pivot(&ds, Dimension::Area, Dimension::Category, PivotMetric::DelayRate);
        assert_eq!(table.rows, vec!["Metro", "Urban"]);
        assert_eq!(table.columns, vec!["Food", "Toys"]);
        assert_eq!(table.cell("Metro", "Food"), Some(100.0));
        assert_eq!(table.cell("Metro", "Toys"), Some(0.0));
        assert_eq!(table.count("Metro", "Toys"), Some(0));
        assert_eq!(table.cell("Urban", "Toys"), Some(0.0));
        assert_eq!(table.count("Urban", "Toys"), Some(1));
    }

    #[test]
    fn empty_dataset_yields_empty_outputs_and_no_data_kpis() {
        let ds = derived(Vec::new(), 30.0);
        assert!(summarize(&ds, Dimension::Traffic).is_empty());
        assert!(pivot(&ds, Dimension::Area, Dimension::Category, PivotMetric::AvgTime).is_empty());
        let kpis = Kpis::compute(&ds);
        assert_eq!(kpis.total, 0);
        assert_eq!(kpis.avg_time, None);
        assert_eq!(kpis.delay_rate, None);
        assert!(kpis.to_string().contains("no data"));
    }

    #[test]
    fn kpi_deltas_compare_against_overall() {
        let overall = derived(
            vec![record(10.0, "A", "Food"), record(50.0, "B", "Food")],
            30.0,
        );
        let current = overall.with_records(vec![overall.records[1].clone()]);
        let comparison = KpiComparison::new(&current, &overall);
        assert_eq!(comparison.avg_time_delta(), Some(20.0));
        assert_eq!(comparison.delay_rate_delta(), Some(50.0));
        assert_eq!(comparison.total_delta(), -1);
    }
}
