//! Pipeline configuration loaded from YAML.
//!
//! Every key is optional; an absent file or key falls back to the defaults
//! below. The configuration is read once per run and stays fixed for it, so
//! age buckets and the delay policy cannot drift between views.
//!
//! ```yaml
//! aliases:
//!   delivery_time: [eta_minutes]
//! age_bins:
//!   edges: [25, 35, 45]
//!   labels: ["<25", "25-34", "35-44", "45+"]
//! policy: { kind: percentile, value: 90 }
//! low_volume_threshold: 20
//! missing_tokens: ["", "nan", "na", "n/a", "null", "none"]
//! unknown_label: Unknown
//! ```

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{derive::DelayPolicy, schema::AliasOverrides};

pub const DEFAULT_LOW_VOLUME_THRESHOLD: usize = 20;
pub const DEFAULT_UNKNOWN_LABEL: &str = "Unknown";
pub const DEFAULT_MISSING_TOKENS: &[&str] = &["", "nan", "na", "n/a", "null", "none"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Age bin edges must be finite and strictly increasing, got {0:?}")]
    UnorderedEdges(Vec<f64>),
    #[error("Age bins need {expected} label(s) for {edges} edge(s), got {actual}")]
    LabelCount {
        edges: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Low-volume threshold must be at least 1")]
    ZeroLowVolumeThreshold,
    #[error("Unknown label must not be empty")]
    EmptyUnknownLabel,
}

/// Right-open age buckets: `(-inf, e0)`, `[e0, e1)`, ..., `[en, inf)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeBins {
    pub edges: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl Default for AgeBins {
    fn default() -> Self {
        Self {
            edges: vec![25.0, 35.0, 45.0],
            labels: vec![
                "<25".to_string(),
                "25-34".to_string(),
                "35-44".to_string(),
                "45+".to_string(),
            ],
        }
    }
}

impl AgeBins {
    pub fn new(edges: Vec<f64>, labels: Vec<String>) -> Result<Self, ConfigError> {
        let bins = Self { edges, labels };
        bins.validate()?;
        Ok(bins.with_generated_labels())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.edges.iter().all(|e| e.is_finite())
            && self.edges.windows(2).all(|pair| pair[0] < pair[1]);
        if !ordered {
            return Err(ConfigError::UnorderedEdges(self.edges.clone()));
        }
        if !self.labels.is_empty() && self.labels.len() != self.edges.len() + 1 {
            return Err(ConfigError::LabelCount {
                edges: self.edges.len(),
                expected: self.edges.len() + 1,
                actual: self.labels.len(),
            });
        }
        Ok(())
    }

    /// Fills in `<a`, `a-(b-1)`, `b+` style labels when none were configured.
    pub fn with_generated_labels(mut self) -> Self {
        if self.labels.is_empty() {
            self.labels = generate_labels(&self.edges);
        }
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Bucket label for `age`; an age on an edge belongs to the bucket that
    /// starts at that edge.
    pub fn label_for(&self, age: f64) -> &str {
        let idx = self.edges.partition_point(|edge| *edge <= age);
        self.labels
            .get(idx)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

fn generate_labels(edges: &[f64]) -> Vec<String> {
    if edges.is_empty() {
        return vec!["All".to_string()];
    }
    let mut labels = Vec::with_capacity(edges.len() + 1);
    labels.push(format!("<{}", edges[0]));
    for pair in edges.windows(2) {
        let upper = pair[1];
        if pair[0].fract() == 0.0 && upper.fract() == 0.0 {
            labels.push(format!("{}-{}", pair[0], upper - 1.0));
        } else {
            labels.push(format!("{}-{}", pair[0], upper));
        }
    }
    labels.push(format!("{}+", edges[edges.len() - 1]));
    labels
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub aliases: AliasOverrides,
    pub age_bins: AgeBins,
    pub policy: DelayPolicy,
    pub low_volume_threshold: usize,
    pub missing_tokens: Vec<String>,
    pub unknown_label: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aliases: AliasOverrides::new(),
            age_bins: AgeBins::default(),
            policy: DelayPolicy::default(),
            low_volume_threshold: DEFAULT_LOW_VOLUME_THRESHOLD,
            missing_tokens: DEFAULT_MISSING_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            unknown_label: DEFAULT_UNKNOWN_LABEL.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: PipelineConfig =
            serde_yaml::from_reader(reader).context("Parsing pipeline config YAML")?;
        config
            .finalize()
            .with_context(|| format!("Validating config {path:?}"))
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(input).context("Parsing pipeline config YAML")?;
        config.finalize()
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing pipeline config to YAML")
    }

    fn finalize(mut self) -> Result<Self> {
        self.age_bins.validate()?;
        self.age_bins = self.age_bins.with_generated_labels();
        if self.low_volume_threshold == 0 {
            return Err(ConfigError::ZeroLowVolumeThreshold.into());
        }
        if self.unknown_label.trim().is_empty() {
            return Err(ConfigError::EmptyUnknownLabel.into());
        }
        self.policy.validate()?;
        Ok(self)
    }

    /// True when `value` (already trimmed) is a missing-value placeholder.
    pub fn is_missing_token(&self, value: &str) -> bool {
        self.missing_tokens
            .iter()
            .any(|token| token.trim().eq_ignore_ascii_case(value))
    }
}
