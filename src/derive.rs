//! Delay threshold and per-record feature derivation.
//!
//! [`derive_features`] turns a cleaned [`Dataset`] into a [`DerivedDataset`]:
//! it computes the active delay threshold τ from a [`DelayPolicy`] and tags
//! every record with `delay_flag`, `age_bin` and `time_band`. The step is a
//! pure function of (dataset, policy, bins).

use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::AgeBins,
    data::{Dataset, Dimension, Record, display_metric},
    stats,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("Percentile must be within [0, 100], got {0}")]
    PercentileOutOfRange(f64),
    #[error("SLA must be a finite number of minutes, got {0}")]
    InvalidSla(f64),
}

/// How τ is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum DelayPolicy {
    /// τ is a fixed number of minutes.
    FixedSla(f64),
    /// τ is this percentile of `delivery_time`.
    Percentile(f64),
    /// τ is the median of `delivery_time`.
    #[default]
    Median,
    /// τ is the mean plus one sample standard deviation.
    MeanPlusStd,
}

impl DelayPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        match *self {
            DelayPolicy::FixedSla(minutes) if !minutes.is_finite() => {
                Err(PolicyError::InvalidSla(minutes))
            }
            DelayPolicy::Percentile(p) if !(0.0..=100.0).contains(&p) => {
                Err(PolicyError::PercentileOutOfRange(p))
            }
            _ => Ok(()),
        }
    }

    /// τ over `delivery_times`; `None` when a statistical policy has no data.
    pub fn threshold(&self, delivery_times: &[f64]) -> Result<Option<f64>, PolicyError> {
        self.validate()?;
        Ok(match *self {
            DelayPolicy::FixedSla(minutes) => Some(minutes),
            DelayPolicy::Percentile(p) => stats::percentile(delivery_times, p),
            DelayPolicy::Median => stats::median(delivery_times),
            DelayPolicy::MeanPlusStd => {
                let mean = stats::mean(delivery_times);
                match (mean, stats::std_dev(delivery_times)) {
                    (Some(mean), Some(sd)) => Some(mean + sd),
                    (Some(mean), None) => Some(mean),
                    _ => None,
                }
            }
        })
    }

    /// Hashable identity used by the load cache.
    pub fn cache_key(&self) -> (u8, u64) {
        match *self {
            DelayPolicy::FixedSla(minutes) => (0, minutes.to_bits()),
            DelayPolicy::Percentile(p) => (1, p.to_bits()),
            DelayPolicy::Median => (2, 0),
            DelayPolicy::MeanPlusStd => (3, 0),
        }
    }
}

impl fmt::Display for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayPolicy::FixedSla(minutes) => write!(f, "fixed SLA of {minutes} min"),
            DelayPolicy::Percentile(p) => write!(f, "P{p} of delivery time"),
            DelayPolicy::Median => f.write_str("median delivery time"),
            DelayPolicy::MeanPlusStd => f.write_str("mean + 1 std dev"),
        }
    }
}

/// The active τ together with the policy that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub policy: DelayPolicy,
    pub minutes: Option<f64>,
}

impl Threshold {
    pub fn is_delayed(&self, delivery_time: f64) -> bool {
        self.minutes.is_some_and(|tau| delivery_time > tau)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minutes {
            Some(_) => write!(
                f,
                "{} minutes ({})",
                display_metric(self.minutes, 1),
                self.policy
            ),
            None => write!(f, "no data ({})", self.policy),
        }
    }
}

/// Delivery-time band, right-closed: (0,20], (20,30], (30,40], (40,inf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TimeBand {
    VeryFast,
    Fast,
    Average,
    Slow,
}

impl TimeBand {
    pub fn from_minutes(minutes: f64) -> Self {
        if minutes <= 20.0 {
            TimeBand::VeryFast
        } else if minutes <= 30.0 {
            TimeBand::Fast
        } else if minutes <= 40.0 {
            TimeBand::Average
        } else {
            TimeBand::Slow
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeBand::VeryFast => "Very Fast (<20)",
            TimeBand::Fast => "Fast (20-30)",
            TimeBand::Average => "Average (30-40)",
            TimeBand::Slow => "Slow (>40)",
        }
    }
}

/// A cleaned record plus its derived features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturedRecord {
    #[serde(flatten)]
    pub record: Record,
    pub delay_flag: bool,
    pub age_bin: String,
    pub time_band: TimeBand,
}

impl FeaturedRecord {
    /// Grouping value of this record for `dimension`.
    pub fn dimension_value(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Traffic => &self.record.traffic,
            Dimension::Weather => &self.record.weather,
            Dimension::Vehicle => &self.record.vehicle,
            Dimension::Area => &self.record.area,
            Dimension::Category => &self.record.category,
            Dimension::AgeBin => &self.age_bin,
            Dimension::TimeBand => self.time_band.label(),
        }
    }
}

/// Featured records together with the τ they were flagged against.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedDataset {
    pub records: Vec<FeaturedRecord>,
    pub threshold: Threshold,
}

impl DerivedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A dataset holding `records` under the same τ.
    pub fn with_records(&self, records: Vec<FeaturedRecord>) -> Self {
        Self {
            records,
            threshold: self.threshold,
        }
    }

    pub fn delay_count(&self) -> usize {
        self.records.iter().filter(|r| r.delay_flag).count()
    }
}

pub fn derive_features(
    dataset: &Dataset,
    policy: DelayPolicy,
    bins: &AgeBins,
) -> Result<DerivedDataset, PolicyError> {
    let minutes = policy.threshold(&dataset.delivery_times())?;
    let threshold = Threshold { policy, minutes };
    let records = dataset
        .records
        .iter()
        .map(|record| FeaturedRecord {
            delay_flag: threshold.is_delayed(record.delivery_time),
            age_bin: bins.label_for(record.agent_age).to_string(),
            time_band: TimeBand::from_minutes(record.delivery_time),
            record: record.clone(),
        })
        .collect::<Vec<_>>();
    let derived = DerivedDataset { records, threshold };
    info!(
        "Delay threshold {}; {} of {} deliveries flagged",
        threshold,
        derived.delay_count(),
        derived.len()
    );
    Ok(derived)
}
