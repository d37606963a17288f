pub mod aggregate;
pub mod cache;
pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod derive;
pub mod export;
pub mod filter;
pub mod insights;
pub mod io_utils;
pub mod pipeline;
pub mod schema;
pub mod stats;
pub mod table;

use std::{env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde::Serialize;

use crate::{
    aggregate::{KpiComparison, PivotMetric, PivotTable, SummaryRow},
    cache::{CachedRun, PipelineCache},
    clean::CleanReport,
    cli::{Cli, Commands, FilterArgs, OutputFormat, PolicyArgs, SourceArgs},
    config::PipelineConfig,
    data::{Dimension, display_metric},
    derive::{DerivedDataset, Threshold},
    filter::{FilterSpec, NumericRange},
    insights::{BoxSummary, MonthlyPoint, NumericProfile, ValueCount},
    pipeline::LoadOptions,
    stats::{HistogramBin, Trendline},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("delivery_insights", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Summary(args) => handle_summary(&args),
        Commands::Pivot(args) => handle_pivot(&args),
        Commands::Export(args) => handle_export(&args),
        Commands::Quality(args) => handle_quality(&args),
        Commands::Insights(args) => handle_insights(&args),
        Commands::Config(args) => handle_config(&args),
    }
}

/// A loaded, derived source plus the configuration it was built with.
struct Session {
    config: PipelineConfig,
    run: Arc<CachedRun>,
}

impl Session {
    fn open(source: &SourceArgs, policy: &PolicyArgs) -> Result<Self> {
        let config = PipelineConfig::load_or_default(source.config.as_deref())?;
        let policy = policy.resolve(config.policy);
        policy
            .validate()
            .context("Validating delay policy flags")?;
        info!(
            "Reading '{}' with delimiter '{}' under {}",
            source.input.display(),
            printable_delimiter(io_utils::resolve_input_delimiter(
                &source.input,
                source.delimiter
            )),
            policy
        );
        let options = LoadOptions {
            delimiter: source.delimiter,
            encoding: source.input_encoding.clone(),
            config: config.clone(),
        };
        let mut cache = PipelineCache::new(options);
        let run = cache.get_or_load(&source.input, policy)?;
        Ok(Self { config, run })
    }

    fn overall(&self) -> &DerivedDataset {
        &self.run.derived
    }

    fn filtered(&self, args: &FilterArgs) -> Result<DerivedDataset> {
        if args.is_empty() {
            return Ok(self.run.derived.clone());
        }
        let spec = build_filter(args, self.overall(), &self.config)?;
        debug!("Filter spec: {:?}", spec);
        Ok(pipeline::filter(self.overall(), &spec))
    }
}

fn build_filter(args: &FilterArgs, dataset: &DerivedDataset, config: &PipelineConfig) -> Result<FilterSpec> {
    let mut spec = FilterSpec::observed(dataset);
    for (dimension, values) in args.selections() {
        spec.restrict(dimension, values, config)?;
    }
    for dimension in &args.none {
        spec.exclude_all(*dimension)?;
    }
    if args.rating_min.is_some() || args.rating_max.is_some() {
        spec.rating = NumericRange::new(
            args.rating_min.unwrap_or(f64::NEG_INFINITY),
            args.rating_max.unwrap_or(f64::INFINITY),
        )
        .context("Invalid --rating-min/--rating-max")?;
    }
    if args.age_min.is_some() || args.age_max.is_some() {
        spec.age = NumericRange::new(
            args.age_min.unwrap_or(f64::NEG_INFINITY),
            args.age_max.unwrap_or(f64::INFINITY),
        )
        .context("Invalid --age-min/--age-max")?;
    }
    Ok(spec)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Serializing report to JSON")?;
    println!("{text}");
    Ok(())
}

fn format_delta(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:+.precision$}"),
        None => "no data".to_string(),
    }
}

fn summary_rows(rows: &[SummaryRow]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| {
            vec![
                row.value.clone(),
                format!("{:.1}", row.avg_time),
                format!("{:.1}", row.delay_rate),
                row.count.to_string(),
                row.note().to_string(),
            ]
        })
        .collect()
}

#[derive(Serialize)]
struct SummaryTable<'a> {
    dimension: Dimension,
    rows: &'a [SummaryRow],
}

#[derive(Serialize)]
struct SummaryReport<'a> {
    threshold: Threshold,
    kpis: KpiComparison,
    tables: Vec<SummaryTable<'a>>,
}

fn handle_summary(args: &cli::SummaryArgs) -> Result<()> {
    let session = Session::open(&args.source, &args.policy)?;
    let filtered = session.filtered(&args.filters)?;
    let aggregator = pipeline::aggregator(&session.config, args.order);
    let dimensions = if args.dimensions.is_empty() {
        Dimension::CATEGORICAL.to_vec()
    } else {
        args.dimensions.clone()
    };
    let tables = dimensions
        .iter()
        .map(|dimension| (*dimension, aggregator.summarize(&filtered, *dimension)))
        .collect::<Vec<_>>();
    let kpis = KpiComparison::new(&filtered, session.overall());

    match args.format {
        OutputFormat::Json => print_json(&SummaryReport {
            threshold: filtered.threshold,
            kpis,
            tables: tables
                .iter()
                .map(|(dimension, rows)| SummaryTable {
                    dimension: *dimension,
                    rows,
                })
                .collect(),
        }),
        OutputFormat::Table => {
            println!("Delay threshold: {}", filtered.threshold);
            println!();
            let headers = ["metric", "value", "vs overall"]
                .map(String::from)
                .to_vec();
            let rows = vec![
                vec![
                    "avg delivery time (min)".to_string(),
                    display_metric(kpis.current.avg_time, 1),
                    format_delta(kpis.avg_time_delta(), 1),
                ],
                vec![
                    "delay rate (%)".to_string(),
                    display_metric(kpis.current.delay_rate, 1),
                    format_delta(kpis.delay_rate_delta(), 1),
                ],
                vec![
                    "deliveries".to_string(),
                    kpis.current.total.to_string(),
                    format!("{:+}", kpis.total_delta()),
                ],
                vec![
                    "avg agent rating".to_string(),
                    display_metric(kpis.current.avg_rating, 2),
                    format_delta(kpis.avg_rating_delta(), 2),
                ],
            ];
            print!("{}", table::render_section("KPIs", &headers, &rows));
            let headers = ["value", "avg_time", "delay_rate", "n", "note"]
                .map(String::from)
                .to_vec();
            for (dimension, rows) in &tables {
                println!();
                print!(
                    "{}",
                    table::render_section(&export::group_label(*dimension), &headers, &summary_rows(rows))
                );
            }
            Ok(())
        }
    }
}

fn pivot_rows(pivot: &PivotTable) -> Vec<Vec<String>> {
    pivot
        .rows
        .iter()
        .zip(&pivot.values)
        .map(|(row, values)| {
            std::iter::once(row.clone())
                .chain(values.iter().map(|v| format!("{v:.1}")))
                .collect()
        })
        .collect()
}

fn handle_pivot(args: &cli::PivotArgs) -> Result<()> {
    let session = Session::open(&args.source, &args.policy)?;
    let filtered = session.filtered(&args.filters)?;
    let pivot = pipeline::pivot(&filtered, args.rows, args.columns, args.metric);
    info!(
        "Pivot of {} by {} has {} row(s) and {} column(s)",
        args.rows,
        args.columns,
        pivot.rows.len(),
        pivot.columns.len()
    );
    match args.format {
        OutputFormat::Json => print_json(&pivot),
        OutputFormat::Table => {
            let title = match args.metric {
                PivotMetric::DelayRate => "delay rate (%)",
                PivotMetric::AvgTime => "avg delivery time (min)",
            };
            let headers = std::iter::once(format!("{} \\ {}", args.rows, args.columns))
                .chain(pivot.columns.iter().cloned())
                .collect::<Vec<_>>();
            print!("{}", table::render_section(title, &headers, &pivot_rows(&pivot)));
            Ok(())
        }
    }
}

fn handle_export(args: &cli::ExportArgs) -> Result<()> {
    let session = Session::open(&args.source, &args.policy)?;
    let filtered = session.filtered(&args.filters)?;
    let bytes = pipeline::export(&filtered, &session.config)?;
    io_utils::write_output(args.output.as_deref(), &bytes)?;
    match &args.output {
        Some(path) if !io_utils::is_dash(path) => {
            info!("Export of {} record(s) written to {:?}", filtered.len(), path)
        }
        _ => debug!("Export of {} record(s) written to stdout", filtered.len()),
    }
    Ok(())
}

#[derive(Serialize)]
struct QualityReport<'a> {
    report: &'a CleanReport,
    columns: Vec<(String, String)>,
    numeric: Vec<NumericProfile>,
    value_counts: Vec<Vec<ValueCount>>,
}

fn handle_quality(args: &cli::QualityArgs) -> Result<()> {
    let session = Session::open(&args.source, &PolicyArgs::default())?;
    let loaded = &session.run.loaded;
    let dataset = session.overall();
    let columns = loaded
        .mapping
        .iter()
        .map(|(field, _)| {
            (
                field.to_string(),
                loaded.mapping.source_name(field).unwrap_or_default().to_string(),
            )
        })
        .collect::<Vec<_>>();
    let numeric = insights::numeric_profiles(dataset);
    let value_counts = Dimension::CATEGORICAL
        .iter()
        .map(|dimension| insights::value_counts(dataset, *dimension))
        .collect::<Vec<_>>();

    match args.format {
        OutputFormat::Json => print_json(&QualityReport {
            report: &loaded.report,
            columns,
            numeric,
            value_counts,
        }),
        OutputFormat::Table => {
            let report = &loaded.report;
            let headers = ["measure", "value"].map(String::from).to_vec();
            let mut rows = vec![
                vec!["rows before".to_string(), report.rows_before.to_string()],
                vec!["rows after".to_string(), report.rows_after.to_string()],
                vec!["columns before".to_string(), report.columns_before.to_string()],
                vec!["columns after".to_string(), report.columns_after.to_string()],
                vec![
                    "dropped (missing delivery_time)".to_string(),
                    report.dropped_missing_delivery_time.to_string(),
                ],
                vec!["unparsed dates".to_string(), report.unparsed_dates.to_string()],
            ];
            rows.extend(
                report
                    .imputed
                    .iter()
                    .map(|(field, count)| vec![format!("imputed {field}"), count.to_string()]),
            );
            print!("{}", table::render_section("Cleaning", &headers, &rows));

            println!();
            let headers = ["field", "source column"].map(String::from).to_vec();
            let rows = columns
                .into_iter()
                .map(|(field, source)| vec![field, source])
                .collect::<Vec<_>>();
            print!("{}", table::render_section("Columns", &headers, &rows));

            println!();
            let headers = ["field", "count", "mean", "std", "min", "q1", "median", "q3", "max"]
                .map(String::from)
                .to_vec();
            let rows = numeric
                .iter()
                .map(|profile| match &profile.summary {
                    Some(d) => vec![
                        profile.field.to_string(),
                        d.count.to_string(),
                        format!("{:.2}", d.mean),
                        display_metric(d.std_dev, 2),
                        format!("{:.2}", d.min),
                        format!("{:.2}", d.q1),
                        format!("{:.2}", d.median),
                        format!("{:.2}", d.q3),
                        format!("{:.2}", d.max),
                    ],
                    None => {
                        let mut row = vec![profile.field.to_string(), "0".to_string()];
                        row.extend(std::iter::repeat_n("no data".to_string(), 7));
                        row
                    }
                })
                .collect::<Vec<_>>();
            print!("{}", table::render_section("Numeric fields", &headers, &rows));

            let headers = ["value", "count"].map(String::from).to_vec();
            for (dimension, counts) in Dimension::CATEGORICAL.iter().zip(&value_counts) {
                println!();
                let rows = counts
                    .iter()
                    .map(|c| vec![c.value.clone(), c.count.to_string()])
                    .collect::<Vec<_>>();
                print!(
                    "{}",
                    table::render_section(&format!("Value counts: {dimension}"), &headers, &rows)
                );
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct InsightsReport {
    histogram: Vec<HistogramBin>,
    by_category: Vec<BoxSummary>,
    rating_trend: Option<Trendline>,
    monthly: Vec<MonthlyPoint>,
}

fn handle_insights(args: &cli::InsightsArgs) -> Result<()> {
    let session = Session::open(&args.source, &args.policy)?;
    let filtered = session.filtered(&args.filters)?;
    let report = InsightsReport {
        histogram: insights::delivery_time_histogram(&filtered, args.bins),
        by_category: insights::box_summaries(&filtered, Dimension::Category),
        rating_trend: insights::rating_trendline(&filtered),
        monthly: insights::monthly_trend(&filtered),
    };

    match args.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            let headers = ["from", "to", "count"].map(String::from).to_vec();
            let rows = report
                .histogram
                .iter()
                .map(|bin| {
                    vec![
                        format!("{:.1}", bin.lower),
                        format!("{:.1}", bin.upper),
                        bin.count.to_string(),
                    ]
                })
                .collect::<Vec<_>>();
            print!("{}", table::render_section("Delivery time distribution", &headers, &rows));

            println!();
            let headers = ["category", "n", "min", "q1", "median", "q3", "max"]
                .map(String::from)
                .to_vec();
            let rows = report
                .by_category
                .iter()
                .map(|b| {
                    vec![
                        b.value.clone(),
                        b.summary.count.to_string(),
                        format!("{:.1}", b.summary.min),
                        format!("{:.1}", b.summary.q1),
                        format!("{:.1}", b.summary.median),
                        format!("{:.1}", b.summary.q3),
                        format!("{:.1}", b.summary.max),
                    ]
                })
                .collect::<Vec<_>>();
            print!("{}", table::render_section("Delivery time by category", &headers, &rows));

            println!();
            match &report.rating_trend {
                Some(fit) => println!(
                    "Rating trend: delivery_time = {:.2} + {:.2} * agent_rating (R² {:.3}, n = {})",
                    fit.intercept, fit.slope, fit.r_squared, fit.n
                ),
                None => println!("Rating trend: no data"),
            }

            if !report.monthly.is_empty() {
                println!();
                let headers = ["month", "avg_time", "n"].map(String::from).to_vec();
                let rows = report
                    .monthly
                    .iter()
                    .map(|p| vec![p.month.clone(), format!("{:.1}", p.avg_time), p.count.to_string()])
                    .collect::<Vec<_>>();
                print!("{}", table::render_section("Monthly trend", &headers, &rows));
            }
            Ok(())
        }
    }
}

fn handle_config(args: &cli::ConfigArgs) -> Result<()> {
    let config = PipelineConfig::load_or_default(args.config.as_deref())?;
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
