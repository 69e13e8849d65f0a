//! Shared domain types.
//!
//! These types are intentionally lightweight and serializable so they can be:
//!
//! - passed between pipeline stages without conversion layers
//! - persisted to SQLite (metadata as JSON)
//! - exported to CSV/JSON reports

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::slugify;

/// Traffic-light rating assigned at every aggregation level.
///
/// `Missing` is not a failure: it marks a node that had no underlying data
/// and therefore contributed zero weight to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Green,
    Yellow,
    Red,
    Missing,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Green => "green",
            Rating::Yellow => "yellow",
            Rating::Red => "red",
            Rating::Missing => "missing",
        }
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurement unit of an indicator.
///
/// `Ratio` values are fractions (0.12 = 12%); `Count` values are plain
/// integers (e.g. number of regulatory events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Ratio,
    Count,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Ratio => "ratio",
            Unit::Count => "count",
        }
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical metadata for one CAMELS indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub id: String,
    pub name: String,
    pub pillar: String,
    pub unit: Unit,
    pub description: Option<String>,
    /// Soft lower bound; values below are flagged, never rejected.
    pub min_value: Option<f64>,
    /// Soft upper bound; values above are flagged, never rejected.
    pub max_value: Option<f64>,
}

impl IndicatorDefinition {
    /// Slug used to match the indicator against source column names.
    pub fn key(&self) -> String {
        slugify(&self.name)
    }
}

/// One bank as known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankRecord {
    pub bank_id: String,
    pub name: String,
    pub country: String,
    pub regulator: String,
}

/// One tabular row as produced by a format parser, before normalization.
///
/// Field order is the row's declared column order and is preserved because
/// period resolution breaks ties by taking the first matching field.
#[derive(Debug, Clone, Default)]
pub struct ParsedRow {
    fields: Vec<(String, String)>,
}

impl ParsedRow {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Look up a field by its exact declared name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate fields in declared column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parser-specific notes attached to a parsed dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseMetadata {
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worksheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
}

/// Ordered rows plus parse metadata, as handed to the transformer.
#[derive(Debug, Clone, Default)]
pub struct ParsedDataset {
    pub rows: Vec<ParsedRow>,
    pub metadata: ParseMetadata,
}

impl ParsedDataset {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Upstream ingestion identity, forwarded opaquely into observation metadata.
#[derive(Debug, Clone, Default)]
pub struct IngestionProvenance {
    pub run_id: Option<String>,
    pub checksum: Option<String>,
}

/// Provenance recorded on every canonical observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationMetadata {
    /// Source column the value came from, exactly as declared.
    pub column: String,
    /// Ingestion run that produced the underlying artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_run: Option<String>,
    /// Content checksum of the underlying artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// One normalized bank/indicator/period value.
///
/// Uniqueness key: (bank_id, indicator_id, period, source_id, run_id).
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalObservation {
    pub bank_id: String,
    pub indicator_id: String,
    /// Canonical `"YYYYQn"` period label.
    pub period: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub value: Option<f64>,
    pub unit: Unit,
    /// The value exactly as it appeared in the source, for audit.
    pub raw_value: Option<String>,
    pub source_id: String,
    pub run_id: String,
    pub metadata: ObservationMetadata,
}

/// Latest known observation for one (bank, indicator) pair at scoring time.
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub bank_id: String,
    pub indicator_id: String,
    pub pillar: String,
    pub period: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub source_id: Option<String>,
    pub normalization_run_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// Scored value for a single indicator.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorScore {
    pub bank_id: String,
    pub indicator_id: String,
    pub pillar: String,
    pub period: Option<String>,
    pub value: Option<f64>,
    pub score: f64,
    pub rating: Rating,
    pub weight: f64,
    pub source_id: Option<String>,
    pub normalization_run_id: Option<String>,
    pub unit: Option<String>,
    pub metadata: serde_json::Value,
}

/// Aggregated score for one CAMELS pillar.
#[derive(Debug, Clone, Serialize)]
pub struct PillarScore {
    pub bank_id: String,
    pub pillar: String,
    pub score: f64,
    pub rating: Rating,
    pub weight: f64,
    pub period: Option<String>,
    pub indicators: Vec<IndicatorScore>,
    pub metadata: serde_json::Value,
}

/// Composite CAMELS score for a bank.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeScore {
    pub bank_id: String,
    pub score: f64,
    pub rating: Rating,
    pub period: Option<String>,
    pub pillars: Vec<PillarScore>,
    pub metadata: serde_json::Value,
}

/// Container for a full scoring run.
#[derive(Debug, Clone)]
pub struct ScoringOutput {
    pub scores: Vec<CompositeScore>,
    pub banks_with_values: usize,
    pub indicators_with_values: usize,
    pub latest_period: Option<String>,
}
