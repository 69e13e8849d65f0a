//! The normalization transformer: parsed rows → canonical observations.
//!
//! Data-quality problems never abort a transform. Anything that cannot be
//! attributed (unknown bank), located (missing period, missing column), or
//! parsed (empty/garbage value) is skipped with a warning; anything merely
//! implausible (outside the indicator's declared range) is flagged and kept.

use std::collections::HashMap;

use tracing::warn;

use crate::catalog::SourceDefinition;
use crate::domain::{
    CanonicalObservation, IngestionProvenance, ObservationMetadata, ParsedDataset, Unit, slugify,
};

use super::indicators::IndicatorCatalog;
use super::period::resolve_period;

pub struct NormalizationTransformer<'a> {
    indicators: &'a IndicatorCatalog,
    bank_lookup: &'a HashMap<String, String>,
}

impl<'a> NormalizationTransformer<'a> {
    pub fn new(indicators: &'a IndicatorCatalog, bank_lookup: &'a HashMap<String, String>) -> Self {
        Self {
            indicators,
            bank_lookup,
        }
    }

    fn resolve_bank_id(&self, bank_name: &str) -> Option<&str> {
        self.bank_lookup.get(&slugify(bank_name)).map(String::as_str)
    }

    /// Convert one parsed dataset into canonical observations.
    ///
    /// Output order is row order × declared indicator order. Deduplication is
    /// the persistence layer's job (upsert on the uniqueness key), not ours.
    pub fn transform(
        &self,
        dataset: &ParsedDataset,
        source: &SourceDefinition,
        ingestion: &IngestionProvenance,
        run_id: &str,
    ) -> Vec<CanonicalObservation> {
        let Some(bank_id) = self.resolve_bank_id(&source.bank) else {
            warn!("Bank '{}' not found in registry; skipping.", source.bank);
            return Vec::new();
        };
        let bank_id = bank_id.to_string();

        // Slug-indexed view of the declared indicator names, in declared order.
        let mut declared: Vec<(String, &str)> = Vec::new();
        for name in &source.indicators {
            let key = slugify(name);
            if !declared.iter().any(|(existing, _)| *existing == key) {
                declared.push((key, name.as_str()));
            }
        }

        let mut observations = Vec::new();
        for row in &dataset.rows {
            let Some(period) = resolve_period(row) else {
                continue;
            };

            // Slug-indexed view of the row's own field names.
            let key_map: HashMap<String, &str> = row
                .iter()
                .map(|(key, _)| (slugify(key), key))
                .collect();

            for (indicator_key, declared_name) in &declared {
                let Some(&column) = key_map.get(indicator_key) else {
                    continue;
                };
                let Some(definition) = self.indicators.by_name(declared_name) else {
                    continue;
                };
                let Some(raw) = row.get(column) else {
                    continue;
                };
                let Some(numeric) = coerce_number(raw) else {
                    continue;
                };
                let value = rescale(numeric, definition.unit);

                let below = definition.min_value.is_some_and(|min| value < min);
                let above = definition.max_value.is_some_and(|max| value > max);
                if below || above {
                    warn!(
                        "Value {value:.4} for {} ({}) falls outside expected range {:.2}-{:.2}",
                        declared_name,
                        period.label,
                        definition.min_value.unwrap_or(f64::NEG_INFINITY),
                        definition.max_value.unwrap_or(f64::INFINITY),
                    );
                }

                observations.push(CanonicalObservation {
                    bank_id: bank_id.clone(),
                    indicator_id: definition.id.clone(),
                    period: period.label.clone(),
                    period_start: Some(period.start),
                    period_end: Some(period.end),
                    value: Some(value),
                    unit: definition.unit,
                    raw_value: Some(raw.to_string()),
                    source_id: source.id.clone(),
                    run_id: run_id.to_string(),
                    metadata: ObservationMetadata {
                        column: column.to_string(),
                        source_run: ingestion.run_id.clone(),
                        checksum: ingestion.checksum.clone(),
                    },
                });
            }
        }
        observations
    }
}

/// Coerce a raw field value to a float, or `None` when it isn't one.
///
/// Percent signs and thousands separators are cosmetic and stripped; an
/// empty or unparseable cell yields `None` — never a synthesized zero.
fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| *ch != '%' && *ch != ',')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    let value = cleaned.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Magnitude-based unit reconciliation for ratio indicators.
///
/// A ratio with |v| > 2 was almost certainly reported in percentage points
/// rather than as a fraction, so it is divided by 100. Only the unit and the
/// magnitude are consulted.
fn rescale(value: f64, unit: Unit) -> f64 {
    if unit == Unit::Ratio && value.abs() > 2.0 {
        value / 100.0
    } else {
        value
    }
}
