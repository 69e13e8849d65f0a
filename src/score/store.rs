//! Persistence for scoring outputs.
//!
//! Score rows are keyed by run id and fully replaced on rerun: one run id,
//! one consistent set of composite/pillar/indicator rows.

use rusqlite::Connection;

use crate::domain::{CompositeScore, IndicatorScore, PillarScore};
use crate::error::AppError;

pub struct ScoringStore<'a> {
    conn: &'a Connection,
}

impl<'a> ScoringStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replace all score rows for `run_id` with `scores`, atomically.
    pub fn persist(&self, run_id: &str, scores: &[CompositeScore]) -> Result<(), AppError> {
        self.conn.execute_batch("BEGIN")?;
        let result = self.persist_inner(run_id, scores);
        match result {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    fn persist_inner(&self, run_id: &str, scores: &[CompositeScore]) -> Result<(), AppError> {
        self.conn
            .execute("DELETE FROM scores WHERE run_id=?1", [run_id])?;
        self.conn
            .execute("DELETE FROM pillar_scores WHERE run_id=?1", [run_id])?;
        self.conn
            .execute("DELETE FROM indicator_scores WHERE run_id=?1", [run_id])?;

        for composite in scores {
            self.insert_composite(run_id, composite)?;
        }
        Ok(())
    }

    fn insert_composite(&self, run_id: &str, composite: &CompositeScore) -> Result<(), AppError> {
        self.conn.execute(
            r#"
            INSERT INTO scores (run_id, bank_id, score, rating, period, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                run_id,
                composite.bank_id,
                composite.score,
                composite.rating.as_str(),
                composite.period,
                composite.metadata.to_string(),
            ],
        )?;
        for pillar in &composite.pillars {
            self.insert_pillar(run_id, pillar)?;
        }
        Ok(())
    }

    fn insert_pillar(&self, run_id: &str, pillar: &PillarScore) -> Result<(), AppError> {
        self.conn.execute(
            r#"
            INSERT INTO pillar_scores (run_id, bank_id, pillar, score, rating, weight, period, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            rusqlite::params![
                run_id,
                pillar.bank_id,
                pillar.pillar,
                pillar.score,
                pillar.rating.as_str(),
                pillar.weight,
                pillar.period,
                pillar.metadata.to_string(),
            ],
        )?;
        for indicator in &pillar.indicators {
            self.insert_indicator(run_id, indicator)?;
        }
        Ok(())
    }

    fn insert_indicator(&self, run_id: &str, indicator: &IndicatorScore) -> Result<(), AppError> {
        self.conn.execute(
            r#"
            INSERT INTO indicator_scores (
                run_id, bank_id, indicator_id, pillar, score, rating, weight,
                value, period, unit, source_id, normalization_run_id, details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            rusqlite::params![
                run_id,
                indicator.bank_id,
                indicator.indicator_id,
                indicator.pillar,
                indicator.score,
                indicator.rating.as_str(),
                indicator.weight,
                indicator.value,
                indicator.period,
                indicator.unit,
                indicator.source_id,
                indicator.normalization_run_id,
                indicator.metadata.to_string(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::domain::Rating;

    fn composite(bank_id: &str, score: f64) -> CompositeScore {
        CompositeScore {
            bank_id: bank_id.to_string(),
            score,
            rating: Rating::Green,
            period: Some("2024Q1".to_string()),
            pillars: vec![PillarScore {
                bank_id: bank_id.to_string(),
                pillar: "capital".to_string(),
                score,
                rating: Rating::Green,
                weight: 1.0,
                period: Some("2024Q1".to_string()),
                indicators: vec![IndicatorScore {
                    bank_id: bank_id.to_string(),
                    indicator_id: "cet1_rwa".to_string(),
                    pillar: "capital".to_string(),
                    period: Some("2024Q1".to_string()),
                    value: Some(0.14),
                    score,
                    rating: Rating::Green,
                    weight: 1.0,
                    source_id: Some("demo-source".to_string()),
                    normalization_run_id: Some("norm-run".to_string()),
                    unit: Some("ratio".to_string()),
                    metadata: serde_json::json!({}),
                }],
                metadata: serde_json::json!({}),
            }],
            metadata: serde_json::json!({"available_weight": 1.0}),
        }
    }

    fn seed_bank(conn: &Connection, bank_id: &str) {
        conn.execute(
            "INSERT INTO banks (bank_id, name, country, regulator) VALUES (?1, 'Banco', 'Guatemala', 'SIB')",
            [bank_id],
        )
        .unwrap();
    }

    #[test]
    fn rerun_replaces_rows_for_the_same_run_id() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed_bank(&conn, "gt-bi");
        let store = ScoringStore::new(&conn);

        store.persist("run-1", &[composite("gt-bi", 100.0)]).unwrap();
        store.persist("run-1", &[composite("gt-bi", 60.0)]).unwrap();

        let (count, score): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(score) FROM scores WHERE run_id='run-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(score, 60.0);

        let indicator_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indicator_scores", [], |row| row.get(0))
            .unwrap();
        assert_eq!(indicator_count, 1);
    }

    #[test]
    fn distinct_run_ids_accumulate() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed_bank(&conn, "gt-bi");
        let store = ScoringStore::new(&conn);

        store.persist("run-1", &[composite("gt-bi", 100.0)]).unwrap();
        store.persist("run-2", &[composite("gt-bi", 80.0)]).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scores", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
