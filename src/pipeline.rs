//! Entry points that chain the stages together.
//!
//! `load` reads, resolves and cleans a source; `derive` fixes τ for a policy;
//! everything after that works on a [`DerivedDataset`] without touching the
//! source again.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::info;

use crate::{
    aggregate::{self, Aggregator, PivotMetric, PivotTable, SummaryOrder, SummaryRow},
    clean::{self, CleanReport},
    config::PipelineConfig,
    data::{Dataset, Dimension},
    derive::{self, DelayPolicy, DerivedDataset},
    export,
    filter::{self, FilterSpec},
    io_utils::{self, RawTable},
    schema::{self, ColumnMapping},
};

/// How a source is read and interpreted.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub delimiter: Option<u8>,
    pub encoding: Option<String>,
    pub config: PipelineConfig,
}

impl LoadOptions {
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(self.encoding.as_deref())
    }
}

/// A cleaned source together with how it was mapped and what cleaning did.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub source: PathBuf,
    pub mapping: ColumnMapping,
    pub dataset: Dataset,
    pub report: CleanReport,
}

pub fn load(path: &Path, options: &LoadOptions) -> Result<Loaded> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let table = io_utils::read_raw_table(path, delimiter, options.encoding()?)?;
    from_table(path, &table, &options.config)
}

/// Same as [`load`] for bytes already read from `path`.
pub fn load_bytes(path: &Path, bytes: &[u8], options: &LoadOptions) -> Result<Loaded> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let table = io_utils::read_raw_table_from(bytes, delimiter, options.encoding()?)
        .with_context(|| format!("Reading {path:?}"))?;
    from_table(path, &table, &options.config)
}

pub fn from_table(path: &Path, table: &RawTable, config: &PipelineConfig) -> Result<Loaded> {
    let mapping = schema::resolve_columns(&table.headers, &config.aliases)
        .with_context(|| format!("Resolving columns of {path:?}"))?;
    let (dataset, report) = clean::clean(table, &mapping, config);
    info!(
        "Loaded {} record(s) from {:?} ({} removed during cleaning)",
        dataset.len(),
        path,
        report.rows_removed()
    );
    Ok(Loaded {
        source: path.to_path_buf(),
        mapping,
        dataset,
        report,
    })
}

pub fn derive(loaded: &Loaded, policy: DelayPolicy, config: &PipelineConfig) -> Result<DerivedDataset> {
    derive::derive_features(&loaded.dataset, policy, &config.age_bins)
        .with_context(|| format!("Deriving features for {:?}", loaded.source))
}

pub fn filter(dataset: &DerivedDataset, spec: &FilterSpec) -> DerivedDataset {
    filter::apply(dataset, spec)
}

pub fn aggregator(config: &PipelineConfig, order: SummaryOrder) -> Aggregator {
    Aggregator::new(config.low_volume_threshold, order)
}

pub fn summarize(dataset: &DerivedDataset, dimension: Dimension, config: &PipelineConfig) -> Vec<SummaryRow> {
    aggregator(config, SummaryOrder::default()).summarize(dataset, dimension)
}

pub fn pivot(
    dataset: &DerivedDataset,
    rows: Dimension,
    columns: Dimension,
    metric: PivotMetric,
) -> PivotTable {
    aggregate::pivot(dataset, rows, columns, metric)
}

/// Export text covering every categorical dimension.
pub fn export(dataset: &DerivedDataset, config: &PipelineConfig) -> Result<Vec<u8>> {
    let tables = aggregator(config, SummaryOrder::default()).summarize_all(dataset);
    export::export(&tables)
}
