//! Ingestion run log persistence.
//!
//! One row per source per run, success or failure. The normalization stage
//! reads back the latest successful row per source to find the artifact it
//! should re-parse.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::AppError;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

/// One ingestion attempt for one source.
#[derive(Debug, Clone)]
pub struct IngestionLogEntry {
    pub run_id: String,
    pub source_id: String,
    pub bank: String,
    pub country: String,
    pub regulator: String,
    pub url: String,
    pub format: String,
    pub frequency: String,
    pub local_path: String,
    pub checksum: String,
    pub record_count: i64,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl IngestionLogEntry {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_SUCCESS)
    }
}

/// Read/write access to `ingestion_log`.
pub struct IngestionStore<'a> {
    conn: &'a Connection,
}

impl<'a> IngestionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn record(&self, entry: &IngestionLogEntry) -> Result<(), AppError> {
        self.conn.execute(
            r#"
            INSERT INTO ingestion_log (
                run_id, source_id, bank, country, regulator, url, format,
                frequency, local_path, checksum, record_count, status, error,
                started_at, completed_at, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            rusqlite::params![
                entry.run_id,
                entry.source_id,
                entry.bank,
                entry.country,
                entry.regulator,
                entry.url,
                entry.format,
                entry.frequency,
                entry.local_path,
                entry.checksum,
                entry.record_count,
                entry.status,
                entry.error,
                entry.started_at.to_rfc3339(),
                entry.completed_at.to_rfc3339(),
                entry.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    /// The most recent successful entry per source, keyed by source id.
    pub fn latest_successful(&self) -> Result<BTreeMap<String, IngestionLogEntry>, AppError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, source_id, bank, country, regulator, url, format,
                   frequency, local_path, checksum, record_count, status, error,
                   started_at, completed_at, metadata
              FROM ingestion_log
             WHERE status = ?1
             ORDER BY completed_at
            "#,
        )?;

        let rows = stmt.query_map([STATUS_SUCCESS], row_to_entry)?;

        // Ordered ascending by completion time, so later rows overwrite
        // earlier ones and each source keeps its newest success.
        let mut latest = BTreeMap::new();
        for entry in rows {
            let entry = entry?;
            latest.insert(entry.source_id.clone(), entry);
        }
        Ok(latest)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestionLogEntry> {
    let started_at: String = row.get("started_at")?;
    let completed_at: String = row.get("completed_at")?;
    let metadata: Option<String> = row.get("metadata")?;
    Ok(IngestionLogEntry {
        run_id: row.get("run_id")?,
        source_id: row.get("source_id")?,
        bank: row.get("bank")?,
        country: row.get("country")?,
        regulator: row.get("regulator")?,
        url: row.get("url")?,
        format: row.get("format")?,
        frequency: row.get("frequency")?,
        local_path: row.get("local_path")?,
        checksum: row.get("checksum")?,
        record_count: row.get("record_count")?,
        status: row.get("status")?,
        error: row.get("error")?,
        started_at: parse_timestamp(&started_at),
        completed_at: parse_timestamp(&completed_at),
        metadata: metadata
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}
