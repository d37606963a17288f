mod common;

use common::{Delivery, TestWorkspace, fixture_path};
use delivery_insights::{
    aggregate::{self, PivotMetric},
    config::PipelineConfig,
    data::Dimension,
    derive::DelayPolicy,
    export::parse_export,
    filter::FilterSpec,
    pipeline::{self, LoadOptions},
    schema::{CanonicalField, SchemaError},
};

fn fixture_run(policy: DelayPolicy) -> (pipeline::Loaded, delivery_insights::derive::DerivedDataset) {
    let options = LoadOptions::default();
    let loaded = pipeline::load(&fixture_path("deliveries.csv"), &options).expect("load fixture");
    let derived = pipeline::derive(&loaded, policy, &options.config).expect("derive fixture");
    (loaded, derived)
}

#[test]
fn aliased_headers_resolve_and_clean() {
    let (loaded, derived) = fixture_run(DelayPolicy::Median);
    assert_eq!(loaded.mapping.source_name(CanonicalField::DeliveryTime), Some("Time_taken(min)"));
    assert_eq!(loaded.mapping.source_name(CanonicalField::Traffic), Some("Road_traffic_density"));
    assert_eq!(loaded.mapping.source_name(CanonicalField::Area), Some("City"));
    assert_eq!(loaded.mapping.source_name(CanonicalField::OrderDate), Some("Order_Date"));

    let report = &loaded.report;
    assert_eq!(report.rows_before, 10);
    assert_eq!(report.rows_after, 9);
    assert_eq!(report.dropped_missing_delivery_time, 1);
    assert_eq!(report.imputed.get("agent_age"), Some(&1));
    assert_eq!(report.imputed.get("agent_rating"), Some(&1));
    assert_eq!(report.unparsed_dates, 1);

    assert_eq!(derived.threshold.minutes, Some(27.0));
    assert_eq!(derived.delay_count(), 4);
    assert!(
        derived
            .records
            .iter()
            .all(|r| ["Low", "Medium", "High", "Jam"].contains(&r.record.traffic.as_str()))
    );
}

#[test]
fn imputation_uses_median_of_kept_rows() {
    let (loaded, _) = fixture_run(DelayPolicy::Median);
    let semi_urban = loaded
        .dataset
        .records
        .iter()
        .find(|r| r.area == "Semi-Urban")
        .expect("semi-urban row");
    assert_eq!(semi_urban.agent_age, 30.0);
    let windy = loaded
        .dataset
        .records
        .iter()
        .find(|r| r.weather == "Windy")
        .expect("windy row");
    assert!((windy.agent_rating - 4.55).abs() < 1e-9);
}

#[test]
fn missing_column_error_names_only_that_field() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "no_weather.csv",
        "Time_taken(min),Road_traffic_density,Type_of_vehicle,Delivery_person_Age,Delivery_person_Ratings,City,Type_of_order\n\
         20,Low,bike,30,4.5,Urban,Snack\n",
    );
    let err = pipeline::load(&path, &LoadOptions::default()).expect_err("weather is missing");
    let schema_error = err.downcast_ref::<SchemaError>().expect("schema error");
    assert_eq!(schema_error.missing, vec!["weather".to_string()]);
    assert!(schema_error.available.contains(&"City".to_string()));
}

#[test]
fn configured_aliases_extend_builtins() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "eta.csv",
        "eta_minutes,traffic,weather,vehicle,agent_age,agent_rating,area,category\n\
         25,Low,Sunny,Bike,30,4.5,Urban,Snack\n",
    );
    let config =
        PipelineConfig::from_yaml_str("aliases:\n  delivery_time: [ETA Minutes]\n").expect("config");
    let loaded = pipeline::load(&path, &LoadOptions::with_config(config)).expect("load");
    assert_eq!(loaded.mapping.source_name(CanonicalField::DeliveryTime), Some("eta_minutes"));
    assert_eq!(loaded.dataset.records[0].delivery_time, 25.0);
}

#[test]
fn traffic_summary_orders_by_delay_rate() {
    let (_, derived) = fixture_run(DelayPolicy::Median);
    let rows = pipeline::summarize(&derived, Dimension::Traffic, &PipelineConfig::default());
    let order = rows.iter().map(|r| r.value.as_str()).collect::<Vec<_>>();
    assert_eq!(order, vec!["Jam", "High", "Medium", "Low"]);
    assert_eq!(rows[0].avg_time, 48.0);
    assert_eq!(rows[0].delay_rate, 100.0);
    assert_eq!(rows.iter().map(|r| r.count).sum::<usize>(), derived.len());
    assert!(rows.iter().all(|r| r.low_volume));
}

#[test]
fn export_round_trips_to_one_decimal() {
    let (_, derived) = fixture_run(DelayPolicy::Percentile(75.0));
    let config = PipelineConfig::default();
    let bytes = pipeline::export(&derived, &config).expect("export");
    let parsed = parse_export(bytes.as_slice()).expect("parse export");

    let expected = aggregate::Aggregator::new(config.low_volume_threshold, Default::default())
        .summarize_all(&derived);
    let flat = expected
        .iter()
        .flat_map(|(dimension, rows)| rows.iter().map(move |row| (*dimension, row)))
        .collect::<Vec<_>>();
    assert_eq!(parsed.len(), flat.len());
    for (row, (dimension, summary)) in parsed.iter().zip(&flat) {
        assert_eq!(row.group, format!("by_{dimension}"));
        assert_eq!(row.value, summary.value);
        assert_eq!(row.n, summary.count);
        assert!((row.avg_time - summary.avg_time).abs() < 0.05);
        assert!((row.delay_rate - summary.delay_rate).abs() < 0.05);
    }
    let groups = parsed
        .iter()
        .map(|r| r.group.as_str())
        .collect::<Vec<_>>();
    let first_category = groups.iter().position(|g| *g == "by_category").expect("category rows");
    assert!(groups[..first_category].iter().all(|g| *g != "by_category"));
}

#[test]
fn disjoint_filters_yield_empty_summaries() {
    let (_, derived) = fixture_run(DelayPolicy::Median);
    let config = PipelineConfig::default();
    let mut spec = FilterSpec::observed(&derived);
    spec.restrict(Dimension::Traffic, ["Low"], &config)
        .expect("traffic");
    spec.restrict(Dimension::Weather, ["Stormy"], &config)
        .expect("weather");
    let filtered = pipeline::filter(&derived, &spec);
    assert!(filtered.is_empty());
    assert_eq!(filtered.threshold, derived.threshold);
    for dimension in Dimension::CATEGORICAL {
        assert!(pipeline::summarize(&filtered, dimension, &config).is_empty());
    }
    assert!(pipeline::pivot(&filtered, Dimension::Area, Dimension::Category, PivotMetric::DelayRate).is_empty());
    let text = String::from_utf8(pipeline::export(&filtered, &config).expect("export")).expect("utf8");
    assert_eq!(text, "group,value,avg_time,delay_rate,n,note\n");
}

#[test]
fn fixed_sla_scenario_flags_strictly_greater() {
    let workspace = TestWorkspace::new();
    let rows = [10.0, 20.0, 30.0, 40.0, 100.0]
        .iter()
        .map(|minutes| Delivery {
            minutes: *minutes,
            traffic: "Low",
            weather: "Sunny",
            vehicle: "Bike",
            age: 30.0,
            rating: 4.5,
            area: "Urban",
            category: "Snack",
        })
        .collect::<Vec<_>>();
    let path = workspace.write_deliveries("scenario.csv", &rows);
    let options = LoadOptions::default();
    let loaded = pipeline::load(&path, &options).expect("load");
    let derived = pipeline::derive(&loaded, DelayPolicy::FixedSla(35.0), &options.config).expect("derive");
    let flags = derived.records.iter().map(|r| r.delay_flag).collect::<Vec<_>>();
    assert_eq!(flags, vec![false, false, false, true, true]);
    let rows = pipeline::summarize(&derived, Dimension::Traffic, &options.config);
    assert_eq!(rows[0].delay_rate, 40.0);

    let at_threshold = pipeline::derive(&loaded, DelayPolicy::FixedSla(40.0), &options.config).expect("derive");
    assert!(!at_threshold.records[3].delay_flag);
}

#[test]
fn pivot_area_by_category_uses_counts_for_empty_cells() {
    let (_, derived) = fixture_run(DelayPolicy::Median);
    let pivot = pipeline::pivot(&derived, Dimension::Area, Dimension::Category, PivotMetric::AvgTime);
    assert_eq!(pivot.rows, vec!["Metropolitian", "Semi-Urban", "Urban"]);
    assert_eq!(pivot.cell("Semi-Urban", "Meal"), Some(0.0));
    assert_eq!(pivot.count("Semi-Urban", "Meal"), Some(0));
    assert_eq!(pivot.cell("Metropolitian", "Buffet"), Some(47.0));
}

#[test]
fn tab_separated_input_is_detected_by_extension() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "deliveries.tsv",
        "delivery_time\ttraffic\tweather\tvehicle\tagent_age\tagent_rating\tarea\tcategory\n\
         33\tjam\tfog\tvan\t41\t3.8\tmetropolitian\tmeal\n",
    );
    let loaded = pipeline::load(&path, &LoadOptions::default()).expect("load tsv");
    assert_eq!(loaded.dataset.records[0].traffic, "Jam");
    assert_eq!(loaded.dataset.records[0].delivery_time, 33.0);
}
