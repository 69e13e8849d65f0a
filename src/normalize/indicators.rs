//! Standard CAMELS indicator definitions.
//!
//! The catalog is static: sixteen indicators across the six pillars, with
//! the unit and a soft plausibility range for each. Ranges are advisory —
//! out-of-range values are flagged by the transformer, never dropped.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::domain::{IndicatorDefinition, Unit, slugify};
use crate::error::AppError;

/// Build the static indicator catalog.
pub fn indicator_catalog() -> Vec<IndicatorDefinition> {
    fn def(
        id: &str,
        name: &str,
        pillar: &str,
        unit: Unit,
        description: &str,
        min_value: f64,
        max_value: f64,
    ) -> IndicatorDefinition {
        IndicatorDefinition {
            id: id.to_string(),
            name: name.to_string(),
            pillar: pillar.to_string(),
            unit,
            description: Some(description.to_string()),
            min_value: Some(min_value),
            max_value: Some(max_value),
        }
    }

    vec![
        def(
            "cet1_rwa",
            "CET1/RWA",
            "capital",
            Unit::Ratio,
            "Common equity tier 1 over risk-weighted assets.",
            0.0,
            1.0,
        ),
        def(
            "tcr",
            "TCR",
            "capital",
            Unit::Ratio,
            "Total capital ratio as reported by the bank.",
            0.0,
            1.5,
        ),
        def(
            "leverage",
            "Leverage",
            "capital",
            Unit::Ratio,
            "Regulatory leverage ratio.",
            0.0,
            0.25,
        ),
        def(
            "npl",
            "NPL",
            "assets",
            Unit::Ratio,
            "Non-performing loans over total loan book.",
            0.0,
            0.5,
        ),
        def(
            "npl_coverage",
            "Cobertura NPL",
            "assets",
            Unit::Ratio,
            "Provision coverage of non-performing loans.",
            0.0,
            5.0,
        ),
        def(
            "cost_of_risk",
            "Cost of Risk",
            "assets",
            Unit::Ratio,
            "Cost of risk against the average loan book.",
            -0.5,
            0.5,
        ),
        def(
            "efficiency_ratio",
            "Efficiency ratio",
            "management",
            Unit::Ratio,
            "Operating expenses over operating income.",
            0.0,
            2.0,
        ),
        def(
            "regulatory_events",
            "Eventos regulatorios",
            "management",
            Unit::Count,
            "Number of materialized regulatory events.",
            0.0,
            50.0,
        ),
        def(
            "roe",
            "ROE",
            "earnings",
            Unit::Ratio,
            "Annualized return on equity.",
            -1.0,
            1.0,
        ),
        def(
            "roa",
            "ROA",
            "earnings",
            Unit::Ratio,
            "Annualized return on assets.",
            -0.5,
            0.5,
        ),
        def(
            "nim",
            "NIM",
            "earnings",
            Unit::Ratio,
            "Quarterly average net interest margin.",
            -0.2,
            0.5,
        ),
        def(
            "lcr",
            "LCR",
            "liquidity",
            Unit::Ratio,
            "Liquidity coverage ratio.",
            0.0,
            3.0,
        ),
        def(
            "nsfr",
            "NSFR",
            "liquidity",
            Unit::Ratio,
            "Net stable funding ratio.",
            0.0,
            3.0,
        ),
        def(
            "loans_deposits",
            "Loans/Deposits",
            "liquidity",
            Unit::Ratio,
            "Loan book over customer deposits.",
            0.0,
            2.0,
        ),
        def(
            "fx_open_position",
            "FX open position",
            "sensitivity",
            Unit::Ratio,
            "Open foreign-currency position over equity.",
            -0.5,
            0.5,
        ),
        def(
            "duration_gap",
            "Duration gap proxy",
            "sensitivity",
            Unit::Ratio,
            "Asset-liability duration difference.",
            -5.0,
            5.0,
        ),
    ]
}

/// Lookup helper over indicator definitions.
#[derive(Debug, Clone)]
pub struct IndicatorCatalog {
    by_id: BTreeMap<String, IndicatorDefinition>,
    by_key: BTreeMap<String, IndicatorDefinition>,
}

impl IndicatorCatalog {
    pub fn new(definitions: Vec<IndicatorDefinition>) -> Self {
        let mut by_id = BTreeMap::new();
        let mut by_key = BTreeMap::new();
        for definition in definitions {
            by_key.insert(definition.key(), definition.clone());
            by_id.insert(definition.id.clone(), definition);
        }
        Self { by_id, by_key }
    }

    pub fn standard() -> Self {
        Self::new(indicator_catalog())
    }

    pub fn by_id(&self, id: &str) -> Option<&IndicatorDefinition> {
        self.by_id.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&IndicatorDefinition> {
        self.by_key.get(&slugify(name))
    }

    pub fn values(&self) -> impl Iterator<Item = &IndicatorDefinition> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Upsert the catalog into the `indicators` table.
pub fn sync_indicator_catalog(conn: &Connection, catalog: &IndicatorCatalog) -> Result<(), AppError> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO indicators (indicator_id, name, pillar, unit, description, min_value, max_value)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(indicator_id) DO UPDATE SET
            name=excluded.name,
            pillar=excluded.pillar,
            unit=excluded.unit,
            description=excluded.description,
            min_value=excluded.min_value,
            max_value=excluded.max_value,
            updated_at=CURRENT_TIMESTAMP
        "#,
    )?;
    for definition in catalog.values() {
        stmt.execute(rusqlite::params![
            definition.id,
            definition.name,
            definition.pillar,
            definition.unit.as_str(),
            definition.description,
            definition.min_value,
            definition.max_value,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn catalog_lookups_are_name_insensitive() {
        let catalog = IndicatorCatalog::standard();
        assert_eq!(catalog.len(), 16);
        assert!(catalog.by_id("cet1_rwa").is_some());
        assert_eq!(catalog.by_name("cet1 rwa").unwrap().id, "cet1_rwa");
        assert_eq!(catalog.by_name("CET1/RWA").unwrap().id, "cet1_rwa");
        assert!(catalog.by_name("unknown").is_none());
    }

    #[test]
    fn sync_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        let catalog = IndicatorCatalog::standard();

        sync_indicator_catalog(&conn, &catalog).unwrap();
        sync_indicator_catalog(&conn, &catalog).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indicators", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 16);
    }
}
