#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

pub const CANONICAL_HEADER: &str =
    "delivery_time,traffic,weather,vehicle,agent_age,agent_rating,area,category";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// One delivery row in canonical column order.
#[derive(Debug, Clone)]
pub struct Delivery<'a> {
    pub minutes: f64,
    pub traffic: &'a str,
    pub weather: &'a str,
    pub vehicle: &'a str,
    pub age: f64,
    pub rating: f64,
    pub area: &'a str,
    pub category: &'a str,
}

impl Delivery<'_> {
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.minutes,
            self.traffic,
            self.weather,
            self.vehicle,
            self.age,
            self.rating,
            self.area,
            self.category
        )
    }
}

pub fn deliveries_csv(rows: &[Delivery<'_>]) -> String {
    let mut text = format!("{CANONICAL_HEADER}\n");
    for row in rows {
        text.push_str(&row.to_csv_line());
        text.push('\n');
    }
    text
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn write_deliveries(&self, name: &str, rows: &[Delivery<'_>]) -> PathBuf {
        self.write(name, &deliveries_csv(rows))
    }
}
