use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::Serialize;

use crate::{
    clean::normalize_category,
    config::PipelineConfig,
    data::Dimension,
    derive::{DerivedDataset, FeaturedRecord},
};

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(anyhow!("Invalid range {min}..={max}"));
        }
        Ok(Self { min, max })
    }

    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn observed<I: Iterator<Item = f64>>(values: I) -> Self {
        values.fold(None, |acc: Option<NumericRange>, v| {
            Some(match acc {
                Some(range) => NumericRange {
                    min: range.min.min(v),
                    max: range.max.max(v),
                },
                None => NumericRange { min: v, max: v },
            })
        })
        .unwrap_or_else(NumericRange::unbounded)
    }
}

/// Allowed values per categorical dimension plus rating/age ranges.
///
/// Built from the data it will filter: every dimension starts with exactly
/// the values observed in the dataset, so a default spec keeps every record
/// and never admits a value the dataset does not contain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    selections: BTreeMap<Dimension, BTreeSet<String>>,
    pub rating: NumericRange,
    pub age: NumericRange,
}

impl FilterSpec {
    pub fn observed(dataset: &DerivedDataset) -> Self {
        let mut selections: BTreeMap<Dimension, BTreeSet<String>> = Dimension::CATEGORICAL
            .iter()
            .map(|d| (*d, BTreeSet::new()))
            .collect();
        for record in &dataset.records {
            for dimension in Dimension::CATEGORICAL {
                if let Some(values) = selections.get_mut(&dimension) {
                    values.insert(record.dimension_value(dimension).to_string());
                }
            }
        }
        Self {
            selections,
            rating: NumericRange::observed(dataset.records.iter().map(|r| r.record.agent_rating)),
            age: NumericRange::observed(dataset.records.iter().map(|r| r.record.agent_age)),
        }
    }

    pub fn allowed(&self, dimension: Dimension) -> Option<&BTreeSet<String>> {
        self.selections.get(&dimension)
    }

    /// Replaces the allowed set for `dimension` with normalized `values`.
    /// An empty `values` excludes every record.
    pub fn restrict<I, S>(&mut self, dimension: Dimension, values: I, config: &PipelineConfig) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ensure_filterable(dimension)?;
        let observed = self.selections.get(&dimension).cloned().unwrap_or_default();
        let mut allowed = BTreeSet::new();
        for value in values {
            let Some(normalized) = normalize_category(value.as_ref(), config) else {
                continue;
            };
            if !observed.contains(&normalized) {
                warn!("Value '{normalized}' is not present in '{dimension}'; it matches nothing");
            }
            allowed.insert(normalized);
        }
        self.selections.insert(dimension, allowed);
        Ok(self)
    }

    pub fn exclude_all(&mut self, dimension: Dimension) -> Result<&mut Self> {
        ensure_filterable(dimension)?;
        self.selections.insert(dimension, BTreeSet::new());
        Ok(self)
    }

    pub fn matches(&self, record: &FeaturedRecord) -> bool {
        let categorical = Dimension::CATEGORICAL.iter().all(|dimension| {
            self.selections
                .get(dimension)
                .is_some_and(|allowed| allowed.contains(record.dimension_value(*dimension)))
        });
        categorical
            && self.rating.contains(record.record.agent_rating)
            && self.age.contains(record.record.agent_age)
    }
}

fn ensure_filterable(dimension: Dimension) -> Result<()> {
    if Dimension::CATEGORICAL.contains(&dimension) {
        Ok(())
    } else {
        Err(anyhow!("Dimension '{dimension}' cannot be filtered"))
    }
}

/// Records of `dataset` accepted by `spec`, as a new dataset under the same τ.
pub fn apply(dataset: &DerivedDataset, spec: &FilterSpec) -> DerivedDataset {
    let records = dataset
        .records
        .iter()
        .filter(|record| spec.matches(record))
        .cloned()
        .collect::<Vec<_>>();
    info!("Filter kept {} of {} record(s)", records.len(), dataset.len());
    dataset.with_records(records)
}
