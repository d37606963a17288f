//! Canonical field set and header resolution.
//!
//! Delivery exports arrive with inconsistent headers (`Delivery_Time`,
//! `DeliveryTime`, `Time`, ...). This module owns the canonical
//! [`CanonicalField`] set, the built-in alias table, and [`resolve_columns`],
//! which maps every canonical field onto a source column or fails with a
//! [`SchemaError`] listing the missing fields and the headers that were
//! available.
//!
//! Headers are compared after normalization: surrounding whitespace is
//! trimmed and the remainder is snake-cased, so case, spacing, hyphens and
//! camel humps all collapse to the same token.

use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::anyhow;
use heck::ToSnakeCase;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    DeliveryTime,
    Traffic,
    Weather,
    Vehicle,
    AgentAge,
    AgentRating,
    Area,
    Category,
    OrderDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Categorical,
    Date,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::DeliveryTime,
        CanonicalField::Traffic,
        CanonicalField::Weather,
        CanonicalField::Vehicle,
        CanonicalField::AgentAge,
        CanonicalField::AgentRating,
        CanonicalField::Area,
        CanonicalField::Category,
        CanonicalField::OrderDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::DeliveryTime => "delivery_time",
            CanonicalField::Traffic => "traffic",
            CanonicalField::Weather => "weather",
            CanonicalField::Vehicle => "vehicle",
            CanonicalField::AgentAge => "agent_age",
            CanonicalField::AgentRating => "agent_rating",
            CanonicalField::Area => "area",
            CanonicalField::Category => "category",
            CanonicalField::OrderDate => "order_date",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            CanonicalField::DeliveryTime | CanonicalField::AgentAge | CanonicalField::AgentRating => {
                FieldKind::Numeric
            }
            CanonicalField::OrderDate => FieldKind::Date,
            _ => FieldKind::Categorical,
        }
    }

    pub fn is_required(&self) -> bool {
        !matches!(self, CanonicalField::OrderDate)
    }

    pub fn required() -> impl Iterator<Item = CanonicalField> {
        Self::ALL.into_iter().filter(CanonicalField::is_required)
    }

    /// Known header variants, already normalized.
    pub fn builtin_aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::DeliveryTime => &["time", "delivery_minutes", "time_taken", "time_taken_min"],
            CanonicalField::Traffic => &["traffic_condition", "traffic_level", "road_traffic_density"],
            CanonicalField::Weather => &["weather_condition", "weather_conditions"],
            CanonicalField::Vehicle => &["vehicle_type", "type_of_vehicle"],
            CanonicalField::AgentAge => &["age", "delivery_person_age"],
            CanonicalField::AgentRating => &["rating", "delivery_person_ratings"],
            CanonicalField::Area => &["location", "region", "city"],
            CanonicalField::Category => &["product_category", "type_of_order"],
            CanonicalField::OrderDate => &["date", "delivery_date", "order_day"],
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_header(value);
        CanonicalField::ALL
            .into_iter()
            .find(|field| field.as_str() == normalized)
            .ok_or_else(|| {
                anyhow!(
                    "Unknown field '{value}'. Supported fields: {}",
                    CanonicalField::ALL.iter().join(", ")
                )
            })
    }
}

/// Raised when a required canonical field has no matching source column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Missing required columns: {missing:?}. Available columns: {available:?}")]
pub struct SchemaError {
    pub missing: Vec<String>,
    pub available: Vec<String>,
}

/// Extra header variants supplied by configuration, keyed by canonical field.
pub type AliasOverrides = BTreeMap<CanonicalField, Vec<String>>;

/// Canonical field → source column index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<CanonicalField, usize>,
    headers: Vec<String>,
}

impl ColumnMapping {
    pub fn index_of(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn source_name(&self, field: CanonicalField) -> Option<&str> {
        self.index_of(field)
            .and_then(|idx| self.headers.get(idx))
            .map(String::as_str)
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, usize)> + '_ {
        self.columns.iter().map(|(field, idx)| (*field, *idx))
    }
}

pub fn normalize_header(header: &str) -> String {
    header.trim().to_snake_case()
}

/// Maps each canonical field to the first matching source header.
///
/// Exact matches on the canonical name win over alias matches; among several
/// candidates of the same kind the earliest header is chosen. A header is
/// claimed by at most one field.
pub fn resolve_columns(
    headers: &[String],
    overrides: &AliasOverrides,
) -> Result<ColumnMapping, SchemaError> {
    let normalized = headers
        .iter()
        .map(|h| normalize_header(h))
        .collect::<Vec<_>>();
    let mut claimed = vec![false; headers.len()];
    let mut columns = BTreeMap::new();
    let mut missing = Vec::new();

    for field in CanonicalField::ALL {
        let exact = candidates(&normalized, &claimed, |token| token == field.as_str());
        let chosen = if !exact.is_empty() {
            exact
        } else {
            let aliases = field
                .builtin_aliases()
                .iter()
                .map(|alias| alias.to_string())
                .chain(
                    overrides
                        .get(&field)
                        .into_iter()
                        .flatten()
                        .map(|alias| normalize_header(alias)),
                )
                .collect::<Vec<_>>();
            candidates(&normalized, &claimed, |token| {
                aliases.iter().any(|alias| alias == token)
            })
        };

        match chosen.first() {
            Some(&idx) => {
                if chosen.len() > 1 {
                    debug!(
                        "Field '{}' matches {} columns ({}); using '{}'",
                        field,
                        chosen.len(),
                        chosen.iter().map(|i| &headers[*i]).join(", "),
                        headers[idx]
                    );
                } else {
                    debug!("Field '{}' resolved to column '{}'", field, headers[idx]);
                }
                claimed[idx] = true;
                columns.insert(field, idx);
            }
            None if field.is_required() => missing.push(field.as_str().to_string()),
            None => debug!("Optional field '{}' not present", field),
        }
    }

    if missing.is_empty() {
        Ok(ColumnMapping {
            columns,
            headers: headers.to_vec(),
        })
    } else {
        Err(SchemaError {
            missing,
            available: headers.to_vec(),
        })
    }
}

fn candidates<F>(normalized: &[String], claimed: &[bool], matches: F) -> Vec<usize>
where
    F: Fn(&str) -> bool,
{
    normalized
        .iter()
        .enumerate()
        .filter(|(idx, token)| !claimed[*idx] && matches(token.as_str()))
        .map(|(idx, _)| idx)
        .collect()
}
