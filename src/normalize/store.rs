//! Persistence for canonical observations.
//!
//! Upserts are keyed by (bank_id, indicator_id, period, source_id, run_id):
//! re-normalizing under the same run id replaces the row in place, while a
//! new run id appends a fresh historical row. The append-only audit property
//! across runs falls out of the key including `run_id`.

use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use crate::domain::CanonicalObservation;
use crate::error::AppError;

/// Counts from one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Per (bank, indicator) distinct-period coverage.
#[derive(Debug, Clone)]
pub struct CoverageRow {
    pub bank_id: String,
    pub indicator_id: String,
    pub periods: i64,
}

/// Read/write access to `indicator_history` and `normalization_log`.
pub struct NormalizedStore<'a> {
    conn: &'a Connection,
}

impl<'a> NormalizedStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert-or-replace each observation by its uniqueness key.
    pub fn upsert(&self, records: &[CanonicalObservation]) -> Result<NormalizationSummary, AppError> {
        let mut summary = NormalizationSummary::default();
        if records.is_empty() {
            return Ok(summary);
        }

        for record in records {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| AppError::external(format!("Failed to encode metadata: {e}")))?;

            let existing: Option<i64> = self
                .conn
                .query_row(
                    r#"
                    SELECT id FROM indicator_history
                    WHERE bank_id=?1 AND indicator_id=?2 AND period=?3 AND source_id=?4 AND run_id=?5
                    "#,
                    rusqlite::params![
                        record.bank_id,
                        record.indicator_id,
                        record.period,
                        record.source_id,
                        record.run_id,
                    ],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                warn!(
                    "Duplicate record detected for {}/{} {} from source {}; updating existing entry.",
                    record.bank_id, record.indicator_id, record.period, record.source_id
                );
                self.conn.execute(
                    r#"
                    UPDATE indicator_history
                    SET period_start=?1, period_end=?2, value=?3, unit=?4,
                        raw_value=?5, metadata=?6, ingested_at=CURRENT_TIMESTAMP
                    WHERE id=?7
                    "#,
                    rusqlite::params![
                        record.period_start.map(|d| d.to_string()),
                        record.period_end.map(|d| d.to_string()),
                        record.value,
                        record.unit.as_str(),
                        record.raw_value,
                        metadata,
                        id,
                    ],
                )?;
                summary.updated += 1;
            } else {
                self.conn.execute(
                    r#"
                    INSERT INTO indicator_history (
                        bank_id, indicator_id, period, period_start, period_end,
                        value, unit, raw_value, source_id, run_id, metadata
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    rusqlite::params![
                        record.bank_id,
                        record.indicator_id,
                        record.period,
                        record.period_start.map(|d| d.to_string()),
                        record.period_end.map(|d| d.to_string()),
                        record.value,
                        record.unit.as_str(),
                        record.raw_value,
                        record.source_id,
                        record.run_id,
                        metadata,
                    ],
                )?;
                summary.inserted += 1;
            }
        }
        Ok(summary)
    }

    /// Append one row to the normalization event log.
    pub fn log_event(
        &self,
        run_id: &str,
        source_id: &str,
        bank_id: &str,
        indicator_id: &str,
        period: &str,
        status: &str,
        message: Option<&str>,
    ) -> Result<(), AppError> {
        self.conn.execute(
            r#"
            INSERT INTO normalization_log (
                run_id, source_id, bank_id, indicator_id, period, status, message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![run_id, source_id, bank_id, indicator_id, period, status, message],
        )?;
        Ok(())
    }

    /// Distinct-period counts per (bank, indicator), for coverage warnings.
    pub fn coverage(&self) -> Result<Vec<CoverageRow>, AppError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT bank_id, indicator_id, COUNT(DISTINCT period) AS periods
            FROM indicator_history
            GROUP BY bank_id, indicator_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CoverageRow {
                bank_id: row.get(0)?,
                indicator_id: row.get(1)?,
                periods: row.get(2)?,
            })
        })?;
        let mut coverage = Vec::new();
        for row in rows {
            coverage.push(row?);
        }
        Ok(coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::domain::{ObservationMetadata, Unit};
    use chrono::NaiveDate;

    fn seed_reference(conn: &Connection) {
        conn.execute(
            "INSERT INTO banks (bank_id, name, country, regulator) VALUES ('gt-bi', 'Banco Industrial', 'Guatemala', 'SIB')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO indicators (indicator_id, name, pillar, unit) VALUES ('cet1_rwa', 'CET1/RWA', 'capital', 'ratio')",
            [],
        )
        .unwrap();
    }

    fn observation(run_id: &str, value: f64) -> CanonicalObservation {
        CanonicalObservation {
            bank_id: "gt-bi".to_string(),
            indicator_id: "cet1_rwa".to_string(),
            period: "2024Q1".to_string(),
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1),
            period_end: NaiveDate::from_ymd_opt(2024, 3, 31),
            value: Some(value),
            unit: Unit::Ratio,
            raw_value: Some(format!("{value}")),
            source_id: "demo-source".to_string(),
            run_id: run_id.to_string(),
            metadata: ObservationMetadata {
                column: "CET1/RWA".to_string(),
                source_run: Some("ing-run".to_string()),
                checksum: Some("abc".to_string()),
            },
        }
    }

    #[test]
    fn same_run_id_replaces_instead_of_duplicating() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed_reference(&conn);
        let store = NormalizedStore::new(&conn);

        let first = store.upsert(&[observation("run-1", 0.12)]).unwrap();
        assert_eq!(first, NormalizationSummary { inserted: 1, updated: 0 });

        let second = store.upsert(&[observation("run-1", 0.13)]).unwrap();
        assert_eq!(second, NormalizationSummary { inserted: 0, updated: 1 });

        let (count, value): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(value) FROM indicator_history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!((value - 0.13).abs() < 1e-12);
    }

    #[test]
    fn new_run_id_appends_a_historical_row() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed_reference(&conn);
        let store = NormalizedStore::new(&conn);

        store.upsert(&[observation("run-1", 0.12)]).unwrap();
        let second = store.upsert(&[observation("run-2", 0.12)]).unwrap();
        assert_eq!(second, NormalizationSummary { inserted: 1, updated: 0 });

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indicator_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn coverage_counts_distinct_periods() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed_reference(&conn);
        let store = NormalizedStore::new(&conn);

        let mut q2 = observation("run-1", 0.11);
        q2.period = "2024Q2".to_string();
        store.upsert(&[observation("run-1", 0.12), q2]).unwrap();

        let coverage = store.coverage().unwrap();
        assert_eq!(coverage.len(), 1);
        assert_eq!(coverage[0].periods, 2);
    }
}
