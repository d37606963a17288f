use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    aggregate::{PivotMetric, SummaryOrder},
    data::Dimension,
    derive::DelayPolicy,
    insights::DEFAULT_HISTOGRAM_BINS,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Delay analytics for last-mile delivery records",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the delay threshold, headline KPIs and per-dimension summaries
    Summary(SummaryArgs),
    /// Cross-tabulate two dimensions by delay rate or mean delivery time
    Pivot(PivotArgs),
    /// Write the flat group-labelled summary export
    Export(ExportArgs),
    /// Report what cleaning changed plus descriptive statistics
    Quality(QualityArgs),
    /// Delivery-time distribution, per-category spread, rating trend and monthly trend
    Insights(InsightsArgs),
    /// Print the effective pipeline configuration as YAML
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Delivery records (CSV or TSV; `-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML pipeline configuration
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

/// At most one of these may be given; none falls back to the configured policy.
#[derive(Debug, Args, Default)]
pub struct PolicyArgs {
    /// Flag deliveries slower than this many minutes
    #[arg(long, conflicts_with_all = ["percentile", "mean_std"])]
    pub sla: Option<f64>,
    /// Flag deliveries slower than this percentile of delivery time
    #[arg(long, conflicts_with = "mean_std")]
    pub percentile: Option<f64>,
    /// Flag deliveries slower than the mean plus one standard deviation
    #[arg(long = "mean-std")]
    pub mean_std: bool,
}

impl PolicyArgs {
    pub fn resolve(&self, configured: DelayPolicy) -> DelayPolicy {
        if let Some(minutes) = self.sla {
            DelayPolicy::FixedSla(minutes)
        } else if let Some(p) = self.percentile {
            DelayPolicy::Percentile(p)
        } else if self.mean_std {
            DelayPolicy::MeanPlusStd
        } else {
            configured
        }
    }
}

#[derive(Debug, Args, Default)]
pub struct FilterArgs {
    /// Traffic levels to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub traffic: Option<Vec<String>>,
    /// Weather conditions to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub weather: Option<Vec<String>>,
    /// Vehicle types to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub vehicle: Option<Vec<String>>,
    /// Areas to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub area: Option<Vec<String>>,
    /// Product categories to keep (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub category: Option<Vec<String>>,
    /// Select no values at all for a dimension (repeatable)
    #[arg(long = "none", value_parser = parse_dimension, action = clap::ArgAction::Append)]
    pub none: Vec<Dimension>,
    /// Lowest agent rating to keep
    #[arg(long = "rating-min")]
    pub rating_min: Option<f64>,
    /// Highest agent rating to keep
    #[arg(long = "rating-max")]
    pub rating_max: Option<f64>,
    /// Lowest agent age to keep
    #[arg(long = "age-min")]
    pub age_min: Option<f64>,
    /// Highest agent age to keep
    #[arg(long = "age-max")]
    pub age_max: Option<f64>,
}

impl FilterArgs {
    /// User-supplied value lists in dimension order.
    pub fn selections(&self) -> Vec<(Dimension, &[String])> {
        [
            (Dimension::Traffic, &self.traffic),
            (Dimension::Weather, &self.weather),
            (Dimension::Vehicle, &self.vehicle),
            (Dimension::Area, &self.area),
            (Dimension::Category, &self.category),
        ]
        .into_iter()
        .filter_map(|(dimension, values)| values.as_deref().map(|v| (dimension, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.selections().is_empty()
            && self.none.is_empty()
            && self.rating_min.is_none()
            && self.rating_max.is_none()
            && self.age_min.is_none()
            && self.age_max.is_none()
    }
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Row order of each summary table (delay-rate, slowest, fastest, volume)
    #[arg(long, value_parser = parse_order, default_value = "delay-rate")]
    pub order: SummaryOrder,
    /// Only summarize these dimensions (defaults to all)
    #[arg(short = 'd', long = "dimension", value_parser = parse_dimension, value_delimiter = ',')]
    pub dimensions: Vec<Dimension>,
    #[arg(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct PivotArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Dimension laid out down the rows
    #[arg(long, value_parser = parse_dimension, default_value = "area")]
    pub rows: Dimension,
    /// Dimension laid out across the columns
    #[arg(long, value_parser = parse_dimension, default_value = "category")]
    pub columns: Dimension,
    /// Cell metric (delay-rate or avg-time)
    #[arg(long, value_parser = parse_metric, default_value = "delay-rate")]
    pub metric: PivotMetric,
    #[arg(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Destination file (stdout when omitted or `-`)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct QualityArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[arg(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct InsightsArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Number of delivery-time histogram bins
    #[arg(long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
    pub bins: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file to validate and echo (defaults are printed when omitted)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_dimension(value: &str) -> Result<Dimension, String> {
    value.parse::<Dimension>().map_err(|err| err.to_string())
}

pub fn parse_order(value: &str) -> Result<SummaryOrder, String> {
    value.parse::<SummaryOrder>().map_err(|err| err.to_string())
}

pub fn parse_metric(value: &str) -> Result<PivotMetric, String> {
    value.parse::<PivotMetric>().map_err(|err| err.to_string())
}
