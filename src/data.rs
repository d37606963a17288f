use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{io_utils::RawTable, schema::CanonicalField};

/// One cleaned delivery event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub delivery_time: f64,
    pub traffic: String,
    pub weather: String,
    pub vehicle: String,
    pub agent_age: f64,
    pub agent_rating: f64,
    pub area: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_date: Option<NaiveDate>,
}

impl Record {
    pub fn categorical(&self, field: CanonicalField) -> Option<&str> {
        match field {
            CanonicalField::Traffic => Some(&self.traffic),
            CanonicalField::Weather => Some(&self.weather),
            CanonicalField::Vehicle => Some(&self.vehicle),
            CanonicalField::Area => Some(&self.area),
            CanonicalField::Category => Some(&self.category),
            _ => None,
        }
    }
}

/// Cleaned records sharing the canonical schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn delivery_times(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.delivery_time).collect()
    }

    /// Renders the dataset back into text cells under canonical headers.
    pub fn to_raw_table(&self) -> RawTable {
        let include_date = self.records.iter().any(|r| r.order_date.is_some());
        let fields = CanonicalField::ALL
            .into_iter()
            .filter(|f| include_date || *f != CanonicalField::OrderDate)
            .collect::<Vec<_>>();
        let headers = fields.iter().map(|f| f.as_str().to_string()).collect();
        let rows = self
            .records
            .iter()
            .map(|record| {
                fields
                    .iter()
                    .map(|field| match field {
                        CanonicalField::DeliveryTime => record.delivery_time.to_string(),
                        CanonicalField::AgentAge => record.agent_age.to_string(),
                        CanonicalField::AgentRating => record.agent_rating.to_string(),
                        CanonicalField::OrderDate => record
                            .order_date
                            .map(|d| d.format("%Y-%m-%d").to_string())
                            .unwrap_or_default(),
                        other => record.categorical(*other).unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .collect();
        RawTable::new(headers, rows)
    }
}

/// A categorical grouping key over featured records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Traffic,
    Weather,
    Vehicle,
    Area,
    Category,
    AgeBin,
    TimeBand,
}

impl Dimension {
    /// Dimensions a filter can restrict, also the export order.
    pub const CATEGORICAL: [Dimension; 5] = [
        Dimension::Traffic,
        Dimension::Weather,
        Dimension::Vehicle,
        Dimension::Area,
        Dimension::Category,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Traffic => "traffic",
            Dimension::Weather => "weather",
            Dimension::Vehicle => "vehicle",
            Dimension::Area => "area",
            Dimension::Category => "category",
            Dimension::AgeBin => "age_bin",
            Dimension::TimeBand => "time_band",
        }
    }

    pub fn field(&self) -> Option<CanonicalField> {
        match self {
            Dimension::Traffic => Some(CanonicalField::Traffic),
            Dimension::Weather => Some(CanonicalField::Weather),
            Dimension::Vehicle => Some(CanonicalField::Vehicle),
            Dimension::Area => Some(CanonicalField::Area),
            Dimension::Category => Some(CanonicalField::Category),
            Dimension::AgeBin | Dimension::TimeBand => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "traffic" => Ok(Dimension::Traffic),
            "weather" => Ok(Dimension::Weather),
            "vehicle" => Ok(Dimension::Vehicle),
            "area" => Ok(Dimension::Area),
            "category" => Ok(Dimension::Category),
            "age_bin" | "age_group" | "age" => Ok(Dimension::AgeBin),
            "time_band" | "time_category" => Ok(Dimension::TimeBand),
            _ => Err(anyhow!(
                "Unknown dimension '{value}'. Supported dimensions: traffic, weather, vehicle, area, category, age_bin, time_band"
            )),
        }
    }
}

/// Title-cases `value`: the first letter of every alphabetic run is upper
/// case and the rest lower case. Applying it twice is a no-op.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut previous_alpha = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}

/// Parses a finite number, accepting surrounding whitespace.
pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    let trimmed = value.trim();
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(parsed);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(parsed.date());
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

/// Formats a metric for display, substituting `no data` for a missing value.
pub fn display_metric(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "no data".to_string(),
    }
}
