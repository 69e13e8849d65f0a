//! Read-side data access for the scoring engine.

use rusqlite::Connection;

use crate::domain::{BankRecord, IndicatorSnapshot};
use crate::error::AppError;

use super::engine::SnapshotMap;

/// Reads bank profiles and latest indicator snapshots.
pub struct IndicatorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> IndicatorRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn bank_profiles(&self) -> Result<Vec<BankRecord>, AppError> {
        let mut stmt = self
            .conn
            .prepare("SELECT bank_id, name, country, regulator FROM banks ORDER BY bank_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(BankRecord {
                bank_id: row.get(0)?,
                name: row.get(1)?,
                country: row.get(2)?,
                regulator: row.get(3)?,
            })
        })?;
        let mut banks = Vec::new();
        for bank in rows {
            banks.push(bank?);
        }
        Ok(banks)
    }

    /// The snapshot per (bank, indicator): the row with the maximal period
    /// label, ties broken by the newest inserted row.
    pub fn latest_snapshots(&self) -> Result<SnapshotMap, AppError> {
        let mut stmt = self.conn.prepare(
            r#"
            WITH latest_period AS (
                SELECT bank_id, indicator_id, MAX(period) AS period
                FROM indicator_history
                GROUP BY bank_id, indicator_id
            ),
            latest_row AS (
                SELECT ih.bank_id, ih.indicator_id, MAX(ih.id) AS row_id
                FROM indicator_history ih
                JOIN latest_period lp
                    ON ih.bank_id = lp.bank_id
                   AND ih.indicator_id = lp.indicator_id
                   AND ih.period = lp.period
                GROUP BY ih.bank_id, ih.indicator_id
            )
            SELECT ih.bank_id,
                   ih.indicator_id,
                   ih.period,
                   ih.value,
                   ih.unit,
                   ih.source_id,
                   ih.run_id,
                   ih.metadata,
                   i.pillar
            FROM indicator_history ih
            JOIN latest_row lr ON ih.id = lr.row_id
            JOIN indicators i ON i.indicator_id = ih.indicator_id
            ORDER BY ih.bank_id, ih.indicator_id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            let metadata_raw: Option<String> = row.get("metadata")?;
            Ok(IndicatorSnapshot {
                bank_id: row.get("bank_id")?,
                indicator_id: row.get("indicator_id")?,
                pillar: row.get("pillar")?,
                period: row.get("period")?,
                value: row.get("value")?,
                unit: row.get("unit")?,
                source_id: row.get("source_id")?,
                normalization_run_id: row.get("run_id")?,
                metadata: metadata_raw
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        })?;

        let mut snapshots: SnapshotMap = SnapshotMap::new();
        for snapshot in rows {
            let snapshot = snapshot?;
            snapshots
                .entry(snapshot.bank_id.clone())
                .or_default()
                .insert(snapshot.indicator_id.clone(), snapshot);
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn insert_history(
        conn: &Connection,
        period: &str,
        run_id: &str,
        value: f64,
    ) {
        conn.execute(
            r#"
            INSERT INTO indicator_history (
                bank_id, indicator_id, period, value, unit, source_id, run_id, metadata
            ) VALUES ('gt-bi', 'cet1_rwa', ?1, ?2, 'ratio', 'demo-source', ?3, '{"column":"CET1/RWA"}')
            "#,
            rusqlite::params![period, value, run_id],
        )
        .unwrap();
    }

    fn seed(conn: &Connection) {
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

    #[test]
    fn latest_snapshot_prefers_max_period_then_newest_row() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed(&conn);

        insert_history(&conn, "2023Q4", "run-1", 0.10);
        insert_history(&conn, "2024Q1", "run-1", 0.11);
        // Same max period, later run: the newer row wins the tie.
        insert_history(&conn, "2024Q1", "run-2", 0.13);

        let repo = IndicatorRepository::new(&conn);
        let snapshots = repo.latest_snapshots().unwrap();
        let snapshot = &snapshots["gt-bi"]["cet1_rwa"];
        assert_eq!(snapshot.period.as_deref(), Some("2024Q1"));
        assert_eq!(snapshot.normalization_run_id.as_deref(), Some("run-2"));
        assert!((snapshot.value.unwrap() - 0.13).abs() < 1e-12);
        assert_eq!(snapshot.pillar, "capital");
        assert_eq!(snapshot.metadata["column"], "CET1/RWA");
    }

    #[test]
    fn bank_profiles_are_ordered_by_id() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO banks (bank_id, name, country, regulator) VALUES ('gt-b', 'B', 'Guatemala', 'SIB'), ('gt-a', 'A', 'Guatemala', 'SIB')",
            [],
        )
        .unwrap();

        let repo = IndicatorRepository::new(&conn);
        let banks = repo.bank_profiles().unwrap();
        assert_eq!(banks.len(), 2);
        assert_eq!(banks[0].bank_id, "gt-a");
    }
}
