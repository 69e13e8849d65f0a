//! SQLite connection setup and schema management.
//!
//! Every table lives in one database file so a single artifact carries the
//! full history of a deployment: registry, observations, scores, and audit
//! trail. Stores borrow a `&Connection`, which keeps them trivially testable
//! against `Connection::open_in_memory()`.

use std::path::Path;

use rusqlite::Connection;

use crate::error::AppError;

/// Open the pipeline database, enabling foreign keys.
pub fn open(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path).map_err(|e| {
        AppError::external(format!("Failed to open database '{}': {e}", path.display()))
    })?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Create any missing tables and indexes.
///
/// Runs on every stage start; `CREATE TABLE IF NOT EXISTS` keeps it
/// idempotent so stages can run standalone or in any order.
pub fn ensure_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS banks (
            bank_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            regulator TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS indicators (
            indicator_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            pillar TEXT NOT NULL,
            unit TEXT NOT NULL,
            description TEXT,
            min_value REAL,
            max_value REAL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS ingestion_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            bank TEXT NOT NULL,
            country TEXT NOT NULL,
            regulator TEXT NOT NULL,
            url TEXT NOT NULL,
            format TEXT NOT NULL,
            frequency TEXT NOT NULL,
            local_path TEXT NOT NULL,
            checksum TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            metadata TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS indicator_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bank_id TEXT NOT NULL REFERENCES banks(bank_id),
            indicator_id TEXT NOT NULL REFERENCES indicators(indicator_id),
            period TEXT NOT NULL,
            period_start TEXT,
            period_end TEXT,
            value REAL,
            unit TEXT NOT NULL,
            raw_value TEXT,
            source_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            ingested_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            metadata TEXT,
            UNIQUE(bank_id, indicator_id, period, source_id, run_id)
        );

        CREATE TABLE IF NOT EXISTS normalization_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            bank_id TEXT NOT NULL,
            indicator_id TEXT NOT NULL,
            period TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            bank_id TEXT NOT NULL REFERENCES banks(bank_id),
            score REAL NOT NULL,
            rating TEXT NOT NULL,
            period TEXT,
            calculated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            details TEXT
        );

        CREATE TABLE IF NOT EXISTS pillar_scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            bank_id TEXT NOT NULL REFERENCES banks(bank_id),
            pillar TEXT NOT NULL,
            score REAL NOT NULL,
            rating TEXT NOT NULL,
            weight REAL NOT NULL,
            period TEXT,
            calculated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            details TEXT
        );

        CREATE TABLE IF NOT EXISTS indicator_scores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            bank_id TEXT NOT NULL REFERENCES banks(bank_id),
            indicator_id TEXT NOT NULL,
            pillar TEXT NOT NULL,
            score REAL NOT NULL,
            rating TEXT NOT NULL,
            weight REAL NOT NULL,
            value REAL,
            period TEXT,
            unit TEXT,
            source_id TEXT,
            normalization_run_id TEXT,
            calculated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            details TEXT
        );

        CREATE TABLE IF NOT EXISTS audit_trail (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            bank_id TEXT,
            pillar TEXT,
            indicator_id TEXT,
            source_id TEXT,
            period TEXT,
            artifact_path TEXT,
            url TEXT,
            checksum TEXT,
            rating TEXT,
            status TEXT,
            ingestion_run_id TEXT,
            normalization_run_id TEXT,
            recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            metadata TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_indicator_history_lookup
            ON indicator_history (bank_id, indicator_id, period);
        CREATE INDEX IF NOT EXISTS idx_indicator_history_source
            ON indicator_history (source_id, run_id);
        CREATE INDEX IF NOT EXISTS idx_normalization_log_run
            ON normalization_log (run_id);
        CREATE INDEX IF NOT EXISTS idx_ingestion_log_source
            ON ingestion_log (source_id, status);
        CREATE INDEX IF NOT EXISTS idx_scores_run ON scores(run_id);
        CREATE INDEX IF NOT EXISTS idx_pillar_scores_run ON pillar_scores(run_id);
        CREATE INDEX IF NOT EXISTS idx_indicator_scores_run ON indicator_scores(run_id);
        CREATE INDEX IF NOT EXISTS idx_audit_trail_run ON audit_trail(run_id, stage);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='indicator_history'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
