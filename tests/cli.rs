mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use delivery_insights::export::parse_export;
use predicates::str::contains;

fn bin() -> Command {
    Command::cargo_bin("delivery-insights").expect("binary exists")
}

#[test]
fn summary_prints_threshold_kpis_and_tables() {
    let input = fixture_path("deliveries.csv");
    bin()
        .args(["summary", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Delay threshold: 27.0 minutes (median delivery time)"))
        .stdout(contains("KPIs"))
        .stdout(contains("by_traffic"))
        .stdout(contains("by_category"))
        .stdout(contains("Low volume"));
}

#[test]
fn summary_json_reflects_sla_flag() {
    let input = fixture_path("deliveries.csv");
    let output = bin()
        .args(["summary", "-i", input.to_str().unwrap(), "--sla", "40", "--format", "json"])
        .output()
        .expect("run summary");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["threshold"]["minutes"], 40.0);
    assert_eq!(report["kpis"]["current"]["total"], 9);
    assert_eq!(report["tables"].as_array().map(Vec::len), Some(5));
}

#[test]
fn export_writes_file_that_parses_back() {
    let workspace = TestWorkspace::new();
    let input = fixture_path("deliveries.csv");
    let output_path = workspace.path().join("summary.csv");
    bin()
        .args([
            "export",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output_path.to_str().unwrap(),
            "--traffic",
            "jam,high",
        ])
        .assert()
        .success();

    let text = fs::read_to_string(&output_path).expect("read export");
    assert!(text.starts_with("group,value,avg_time,delay_rate,n,note\n"));
    let rows = parse_export(text.as_bytes()).expect("parse export");
    let traffic = rows
        .iter()
        .filter(|r| r.group == "by_traffic")
        .map(|r| r.value.as_str())
        .collect::<Vec<_>>();
    assert_eq!(traffic, vec!["Jam", "High"]);
    assert!(rows.iter().all(|r| r.delay_rate == 100.0));
}

#[test]
fn none_flag_produces_header_only_export() {
    let input = fixture_path("deliveries.csv");
    bin()
        .args(["export", "-i", input.to_str().unwrap(), "--none", "weather"])
        .assert()
        .success()
        .stdout("group,value,avg_time,delay_rate,n,note\n");
}

#[test]
fn pivot_renders_requested_dimensions() {
    let input = fixture_path("deliveries.csv");
    bin()
        .args([
            "pivot",
            "-i",
            input.to_str().unwrap(),
            "--rows",
            "traffic",
            "--columns",
            "vehicle",
            "--metric",
            "avg-time",
        ])
        .assert()
        .success()
        .stdout(contains("avg delivery time (min)"))
        .stdout(contains("traffic \\ vehicle"))
        .stdout(contains("Motorcycle"));
}

#[test]
fn quality_reports_cleaning_and_mapping() {
    let input = fixture_path("deliveries.csv");
    bin()
        .args(["quality", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("dropped (missing delivery_time)"))
        .stdout(contains("Time_taken(min)"))
        .stdout(contains("imputed agent_age"))
        .stdout(contains("Value counts: traffic"));
}

#[test]
fn insights_include_monthly_trend() {
    let input = fixture_path("deliveries.csv");
    bin()
        .args(["insights", "-i", input.to_str().unwrap(), "--bins", "5"])
        .assert()
        .success()
        .stdout(contains("Delivery time distribution"))
        .stdout(contains("Rating trend: delivery_time ="))
        .stdout(contains("2022-03"))
        .stdout(contains("2022-04"));
}

#[test]
fn missing_required_column_fails_with_field_name() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "partial.csv",
        "delivery_time,traffic,weather,vehicle,agent_age,agent_rating,category\n30,Low,Sunny,Bike,30,4.5,Meal\n",
    );
    bin()
        .args(["summary", "-i", input.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("error: Resolving columns"))
        .stderr(contains("Missing required columns: [\"area\"]"))
        .stderr(contains("\"agent_rating\""));
}

#[test]
fn conflicting_policy_flags_are_rejected() {
    let input = fixture_path("deliveries.csv");
    bin()
        .args(["summary", "-i", input.to_str().unwrap(), "--percentile", "90", "--mean-std"])
        .assert()
        .failure();
}

#[test]
fn config_command_echoes_defaults() {
    bin()
        .args(["config"])
        .assert()
        .success()
        .stdout(contains("low_volume_threshold: 20"))
        .stdout(contains("unknown_label: Unknown"));
}

#[test]
fn stdin_input_is_supported() {
    let text = fs::read_to_string(fixture_path("deliveries.csv")).expect("fixture");
    bin()
        .args(["export", "-i", "-"])
        .write_stdin(text)
        .assert()
        .success()
        .stdout(contains("by_traffic,Jam,48,100,3,Low volume"));
}
