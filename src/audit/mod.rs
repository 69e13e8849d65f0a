//! Append-only audit trail.
//!
//! Every stage forwards what it produced into `audit_trail`, keyed by
//! (run_id, stage). Re-running a stage under the same run id rebuilds that
//! slice of the trail (`prepare_stage`) instead of duplicating it; distinct
//! run ids accumulate. Score entries are joined back to the ingestion log so
//! each rated indicator carries the artifact path, URL, and checksum it was
//! ultimately derived from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::stages::StageContext;
use crate::db;
use crate::domain::{CanonicalObservation, CompositeScore};
use crate::error::AppError;
use crate::ingest::log::IngestionLogEntry;

/// One row of the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub run_id: String,
    pub stage: String,
    pub bank_id: Option<String>,
    pub pillar: Option<String>,
    pub indicator_id: Option<String>,
    pub source_id: Option<String>,
    pub period: Option<String>,
    pub artifact_path: Option<String>,
    pub url: Option<String>,
    pub checksum: Option<String>,
    pub rating: Option<String>,
    pub status: Option<String>,
    pub ingestion_run_id: Option<String>,
    pub normalization_run_id: Option<String>,
    pub recorded_at: String,
    pub metadata: serde_json::Value,
}

/// Summary of generated audit export files.
#[derive(Debug, Clone)]
pub struct ExportedAudit {
    pub records: usize,
    pub files: Vec<PathBuf>,
}

/// Ingestion artifact identity used for score lineage.
#[derive(Debug, Clone)]
struct IngestionInfo {
    run_id: String,
    url: String,
    local_path: String,
    checksum: String,
}

/// Read/write access to `audit_trail`.
pub struct AuditStore<'a> {
    conn: &'a Connection,
}

impl<'a> AuditStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Remove previous audit entries for (run_id, stage).
    pub fn prepare_stage(&self, run_id: &str, stage: &str) -> Result<(), AppError> {
        self.conn.execute(
            "DELETE FROM audit_trail WHERE run_id=?1 AND stage=?2",
            [run_id, stage],
        )?;
        Ok(())
    }

    /// Persist audit entries for ingestion log rows.
    pub fn record_ingestions(
        &self,
        run_id: &str,
        entries: &[IngestionLogEntry],
    ) -> Result<usize, AppError> {
        for entry in entries {
            self.insert(&AuditRecordInsert {
                run_id,
                stage: "ingest",
                bank_id: None,
                pillar: None,
                indicator_id: None,
                source_id: Some(&entry.source_id),
                period: None,
                artifact_path: non_empty(&entry.local_path),
                url: Some(&entry.url),
                checksum: non_empty(&entry.checksum),
                rating: None,
                status: Some(&entry.status),
                ingestion_run_id: Some(&entry.run_id),
                normalization_run_id: None,
                metadata: serde_json::json!({
                    "bank": entry.bank,
                    "format": entry.format,
                    "record_count": entry.record_count,
                    "error": entry.error,
                }),
            })?;
        }
        Ok(entries.len())
    }

    /// Persist audit entries for canonical observations.
    pub fn record_observations(
        &self,
        run_id: &str,
        records: &[CanonicalObservation],
    ) -> Result<usize, AppError> {
        for record in records {
            self.insert(&AuditRecordInsert {
                run_id,
                stage: "normalize",
                bank_id: Some(&record.bank_id),
                pillar: None,
                indicator_id: Some(&record.indicator_id),
                source_id: Some(&record.source_id),
                period: Some(&record.period),
                artifact_path: None,
                url: None,
                checksum: record.metadata.checksum.as_deref(),
                rating: None,
                status: Some("normalized"),
                ingestion_run_id: record.metadata.source_run.as_deref(),
                normalization_run_id: Some(&record.run_id),
                metadata: serde_json::json!({
                    "value": record.value,
                    "unit": record.unit,
                    "raw_value": record.raw_value,
                    "column": record.metadata.column,
                }),
            })?;
        }
        Ok(records.len())
    }

    /// Persist audit entries for scored indicators, joined back to the
    /// ingestion artifacts they were derived from.
    pub fn record_scores(
        &self,
        run_id: &str,
        scores: &[CompositeScore],
    ) -> Result<usize, AppError> {
        let sources = sources_from_scores(scores);
        let (by_run, latest) = self.load_ingestions(&sources)?;
        let banks = self.load_banks()?;

        let mut inserted = 0;
        for composite in scores {
            let bank = banks.get(&composite.bank_id);
            for pillar in &composite.pillars {
                for indicator in &pillar.indicators {
                    let source_run = indicator.metadata["source_metadata"]["source_run"]
                        .as_str()
                        .map(str::to_string);
                    let ingestion = indicator.source_id.as_ref().and_then(|source_id| {
                        source_run
                            .as_ref()
                            .and_then(|run| by_run.get(&(source_id.clone(), run.clone())))
                            .or_else(|| latest.get(source_id))
                    });

                    let checksum = indicator.metadata["source_metadata"]["checksum"]
                        .as_str()
                        .map(str::to_string)
                        .or_else(|| ingestion.map(|info| info.checksum.clone()));

                    self.insert(&AuditRecordInsert {
                        run_id,
                        stage: "score",
                        bank_id: Some(&composite.bank_id),
                        pillar: Some(&pillar.pillar),
                        indicator_id: Some(&indicator.indicator_id),
                        source_id: indicator.source_id.as_deref(),
                        period: indicator.period.as_deref(),
                        artifact_path: ingestion.map(|info| info.local_path.as_str()),
                        url: ingestion.map(|info| info.url.as_str()),
                        checksum: checksum.as_deref(),
                        rating: Some(indicator.rating.as_str()),
                        status: Some("scored"),
                        ingestion_run_id: ingestion.map(|info| info.run_id.as_str()),
                        normalization_run_id: indicator.normalization_run_id.as_deref(),
                        metadata: serde_json::json!({
                            "composite_score": composite.score,
                            "composite_rating": composite.rating,
                            "pillar_score": pillar.score,
                            "pillar_rating": pillar.rating,
                            "indicator_value": indicator.value,
                            "indicator_unit": indicator.unit,
                            "indicator_weight": indicator.weight,
                            "bank_name": bank.map(|b| b.0.clone()),
                            "country": bank.map(|b| b.1.clone()),
                            "indicator_metadata": indicator.metadata,
                        }),
                    })?;
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    /// Return audit records filtered by run id and/or stage.
    pub fn records(
        &self,
        run_id: Option<&str>,
        stage: Option<&str>,
    ) -> Result<Vec<AuditRecord>, AppError> {
        let mut query = String::from(
            "SELECT run_id, stage, bank_id, pillar, indicator_id, source_id, \
             period, artifact_path, url, checksum, rating, status, \
             ingestion_run_id, normalization_run_id, recorded_at, metadata \
             FROM audit_trail",
        );
        let mut clauses = Vec::new();
        let mut params: Vec<&str> = Vec::new();
        if let Some(run_id) = run_id {
            clauses.push(format!("run_id=?{}", params.len() + 1));
            params.push(run_id);
        }
        if let Some(stage) = stage {
            clauses.push(format!("stage=?{}", params.len() + 1));
            params.push(stage);
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY recorded_at, id");

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            let metadata_raw: Option<String> = row.get("metadata")?;
            Ok(AuditRecord {
                run_id: row.get("run_id")?,
                stage: row.get("stage")?,
                bank_id: row.get("bank_id")?,
                pillar: row.get("pillar")?,
                indicator_id: row.get("indicator_id")?,
                source_id: row.get("source_id")?,
                period: row.get("period")?,
                artifact_path: row.get("artifact_path")?,
                url: row.get("url")?,
                checksum: row.get("checksum")?,
                rating: row.get("rating")?,
                status: row.get("status")?,
                ingestion_run_id: row.get("ingestion_run_id")?,
                normalization_run_id: row.get("normalization_run_id")?,
                recorded_at: row.get("recorded_at")?,
                metadata: metadata_raw
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        })?;
        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    /// Write the trail for `run_id` to JSON and CSV files under `output_dir`.
    pub fn export_run(&self, run_id: &str, output_dir: &Path) -> Result<ExportedAudit, AppError> {
        let records = self.records(Some(run_id), None)?;
        if records.is_empty() {
            return Ok(ExportedAudit {
                records: 0,
                files: Vec::new(),
            });
        }

        std::fs::create_dir_all(output_dir).map_err(|e| {
            AppError::external(format!(
                "Failed to create output directory '{}': {e}",
                output_dir.display()
            ))
        })?;

        let json_path = output_dir.join(format!("audit_trail_{run_id}.json"));
        let json_file = std::fs::File::create(&json_path).map_err(|e| {
            AppError::external(format!("Failed to create '{}': {e}", json_path.display()))
        })?;
        serde_json::to_writer_pretty(json_file, &records)
            .map_err(|e| AppError::external(format!("Failed to write audit JSON: {e}")))?;

        let csv_path = output_dir.join(format!("audit_trail_{run_id}.csv"));
        write_csv(&csv_path, &records)?;

        Ok(ExportedAudit {
            records: records.len(),
            files: vec![json_path, csv_path],
        })
    }

    fn insert(&self, record: &AuditRecordInsert<'_>) -> Result<(), AppError> {
        self.conn.execute(
            r#"
            INSERT INTO audit_trail (
                run_id, stage, bank_id, pillar, indicator_id, source_id, period,
                artifact_path, url, checksum, rating, status,
                ingestion_run_id, normalization_run_id, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            rusqlite::params![
                record.run_id,
                record.stage,
                record.bank_id,
                record.pillar,
                record.indicator_id,
                record.source_id,
                record.period,
                record.artifact_path,
                record.url,
                record.checksum,
                record.rating,
                record.status,
                record.ingestion_run_id,
                record.normalization_run_id,
                record.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    fn load_ingestions(
        &self,
        sources: &[String],
    ) -> Result<
        (
            HashMap<(String, String), IngestionInfo>,
            HashMap<String, IngestionInfo>,
        ),
        AppError,
    > {
        let mut by_run = HashMap::new();
        let mut latest = HashMap::new();
        if sources.is_empty() {
            return Ok((by_run, latest));
        }

        let mut stmt = self.conn.prepare(
            "SELECT run_id, source_id, url, local_path, checksum, completed_at \
             FROM ingestion_log ORDER BY completed_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>("source_id")?,
                IngestionInfo {
                    run_id: row.get("run_id")?,
                    url: row.get("url")?,
                    local_path: row.get("local_path")?,
                    checksum: row.get("checksum")?,
                },
            ))
        })?;
        for row in rows {
            let (source_id, info) = row?;
            if !sources.contains(&source_id) {
                continue;
            }
            by_run.insert((source_id.clone(), info.run_id.clone()), info.clone());
            latest.insert(source_id, info);
        }
        Ok((by_run, latest))
    }

    fn load_banks(&self) -> Result<HashMap<String, (String, String)>, AppError> {
        let mut stmt = self
            .conn
            .prepare("SELECT bank_id, name, country FROM banks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                (row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            ))
        })?;
        let mut banks = HashMap::new();
        for row in rows {
            let (bank_id, info) = row?;
            banks.insert(bank_id, info);
        }
        Ok(banks)
    }
}

struct AuditRecordInsert<'s> {
    run_id: &'s str,
    stage: &'s str,
    bank_id: Option<&'s str>,
    pillar: Option<&'s str>,
    indicator_id: Option<&'s str>,
    source_id: Option<&'s str>,
    period: Option<&'s str>,
    artifact_path: Option<&'s str>,
    url: Option<&'s str>,
    checksum: Option<&'s str>,
    rating: Option<&'s str>,
    status: Option<&'s str>,
    ingestion_run_id: Option<&'s str>,
    normalization_run_id: Option<&'s str>,
    metadata: serde_json::Value,
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

fn sources_from_scores(scores: &[CompositeScore]) -> Vec<String> {
    let mut sources = Vec::new();
    for composite in scores {
        for pillar in &composite.pillars {
            for indicator in &pillar.indicators {
                if let Some(source_id) = &indicator.source_id {
                    if !sources.contains(source_id) {
                        sources.push(source_id.clone());
                    }
                }
            }
        }
    }
    sources
}

fn write_csv(path: &Path, records: &[AuditRecord]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::external(format!("Failed to create '{}': {e}", path.display())))?;
    writer
        .write_record([
            "run_id",
            "stage",
            "bank_id",
            "pillar",
            "indicator_id",
            "source_id",
            "period",
            "artifact_path",
            "url",
            "checksum",
            "rating",
            "status",
            "ingestion_run_id",
            "normalization_run_id",
            "recorded_at",
            "metadata",
        ])
        .map_err(|e| AppError::external(format!("Failed to write audit CSV header: {e}")))?;
    for record in records {
        writer
            .write_record([
                record.run_id.as_str(),
                record.stage.as_str(),
                record.bank_id.as_deref().unwrap_or(""),
                record.pillar.as_deref().unwrap_or(""),
                record.indicator_id.as_deref().unwrap_or(""),
                record.source_id.as_deref().unwrap_or(""),
                record.period.as_deref().unwrap_or(""),
                record.artifact_path.as_deref().unwrap_or(""),
                record.url.as_deref().unwrap_or(""),
                record.checksum.as_deref().unwrap_or(""),
                record.rating.as_deref().unwrap_or(""),
                record.status.as_deref().unwrap_or(""),
                record.ingestion_run_id.as_deref().unwrap_or(""),
                record.normalization_run_id.as_deref().unwrap_or(""),
                record.recorded_at.as_str(),
                &record.metadata.to_string(),
            ])
            .map_err(|e| AppError::external(format!("Failed to write audit CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::external(format!("Failed to flush audit CSV: {e}")))?;
    Ok(())
}

/// Stage entry point: export the current run's trail to the output directory.
pub fn run_stage(context: &StageContext) -> Result<(), AppError> {
    let conn = db::open(&context.settings.sqlite_path)?;
    db::ensure_schema(&conn)?;
    let store = AuditStore::new(&conn);

    let exported = store.export_run(&context.run_id, &context.settings.output_dir)?;
    if exported.records == 0 {
        warn!("No audit records found for run {}; nothing exported.", context.run_id);
        return Ok(());
    }
    for file in &exported.files {
        info!("Wrote audit export {}", file.display());
    }
    info!(
        "Audit export complete: {} record(s) across {} file(s).",
        exported.records,
        exported.files.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IndicatorScore, PillarScore, Rating};

    fn composite_with_lineage() -> CompositeScore {
        CompositeScore {
            bank_id: "gt-bi".to_string(),
            score: 100.0,
            rating: Rating::Green,
            period: Some("2024Q1".to_string()),
            pillars: vec![PillarScore {
                bank_id: "gt-bi".to_string(),
                pillar: "capital".to_string(),
                score: 100.0,
                rating: Rating::Green,
                weight: 1.0,
                period: Some("2024Q1".to_string()),
                indicators: vec![IndicatorScore {
                    bank_id: "gt-bi".to_string(),
                    indicator_id: "cet1_rwa".to_string(),
                    pillar: "capital".to_string(),
                    period: Some("2024Q1".to_string()),
                    value: Some(0.14),
                    score: 100.0,
                    rating: Rating::Green,
                    weight: 1.0,
                    source_id: Some("demo-source".to_string()),
                    normalization_run_id: Some("norm-run".to_string()),
                    unit: Some("ratio".to_string()),
                    metadata: serde_json::json!({
                        "source_metadata": {"source_run": "ing-run", "checksum": "abc"},
                    }),
                }],
                metadata: serde_json::json!({}),
            }],
            metadata: serde_json::json!({}),
        }
    }

    fn seed(conn: &Connection) {
        conn.execute(
            "INSERT INTO banks (bank_id, name, country, regulator) VALUES ('gt-bi', 'Banco Industrial', 'Guatemala', 'SIB')",
            [],
        )
        .unwrap();
        conn.execute(
            r#"
            INSERT INTO ingestion_log (
                run_id, source_id, bank, country, regulator, url, format, frequency,
                local_path, checksum, record_count, status, started_at, completed_at, metadata
            ) VALUES (
                'ing-run', 'demo-source', 'Banco Industrial', 'Guatemala', 'SIB',
                'https://example.com/demo.csv', 'csv', 'quarterly',
                '/data/raw/demo.csv', 'abc', 4, 'success',
                '2024-04-01T00:00:00+00:00', '2024-04-01T00:05:00+00:00', '{}'
            )
            "#,
            [],
        )
        .unwrap();
    }

    #[test]
    fn score_entries_join_back_to_ingestion_artifacts() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed(&conn);
        let store = AuditStore::new(&conn);

        let inserted = store
            .record_scores("score-run", &[composite_with_lineage()])
            .unwrap();
        assert_eq!(inserted, 1);

        let records = store.records(Some("score-run"), Some("score")).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.checksum.as_deref(), Some("abc"));
        assert_eq!(record.artifact_path.as_deref(), Some("/data/raw/demo.csv"));
        assert_eq!(record.url.as_deref(), Some("https://example.com/demo.csv"));
        assert_eq!(record.ingestion_run_id.as_deref(), Some("ing-run"));
        assert_eq!(record.normalization_run_id.as_deref(), Some("norm-run"));
        assert_eq!(record.metadata["bank_name"], "Banco Industrial");
    }

    #[test]
    fn prepare_stage_rebuilds_only_that_slice() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        seed(&conn);
        let store = AuditStore::new(&conn);

        store
            .record_scores("run-1", &[composite_with_lineage()])
            .unwrap();
        store
            .record_scores("run-2", &[composite_with_lineage()])
            .unwrap();

        store.prepare_stage("run-1", "score").unwrap();
        store
            .record_scores("run-1", &[composite_with_lineage()])
            .unwrap();

        assert_eq!(store.records(Some("run-1"), None).unwrap().len(), 1);
        assert_eq!(store.records(Some("run-2"), None).unwrap().len(), 1);
        assert_eq!(store.records(None, Some("score")).unwrap().len(), 2);
    }
}
