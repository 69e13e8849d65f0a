//! Consolidated report exports.
//!
//! Reads one run's persisted scores back out of SQLite and writes analyst-
//! facing artifacts: a portfolio CSV (one row per bank), an indicator CSV
//! (one row per rated indicator), and a JSON summary of the run.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::stages::StageContext;
use crate::db;
use crate::error::AppError;

/// Details about the generated export files.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub portfolio_rows: usize,
    pub indicator_rows: usize,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
struct PortfolioRow {
    bank_id: String,
    bank_name: String,
    country: String,
    regulator: String,
    score: f64,
    rating: String,
    period: Option<String>,
    metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct IndicatorRow {
    bank_id: String,
    bank_name: String,
    indicator_id: String,
    indicator_name: Option<String>,
    pillar: String,
    value: Option<f64>,
    score: f64,
    rating: String,
    weight: f64,
    period: Option<String>,
    unit: Option<String>,
    source_id: Option<String>,
    normalization_run_id: Option<String>,
}

/// Create consolidated artifacts for one run's scores.
pub struct ExportGenerator<'a> {
    conn: &'a Connection,
    output_dir: PathBuf,
}

impl<'a> ExportGenerator<'a> {
    pub fn new(conn: &'a Connection, output_dir: &Path) -> Self {
        Self {
            conn,
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn generate(&self, run_id: &str) -> Result<ExportSummary, AppError> {
        let portfolio = self.portfolio_rows(run_id)?;
        let indicators = self.indicator_rows(run_id)?;
        if portfolio.is_empty() && indicators.is_empty() {
            return Ok(ExportSummary {
                portfolio_rows: 0,
                indicator_rows: 0,
                files: Vec::new(),
            });
        }

        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            AppError::external(format!(
                "Failed to create output directory '{}': {e}",
                self.output_dir.display()
            ))
        })?;

        let portfolio_csv = self.output_dir.join(format!("camels_portfolio_{run_id}.csv"));
        let indicator_csv = self.output_dir.join(format!("camels_indicators_{run_id}.csv"));
        let summary_json = self.output_dir.join(format!("camels_summary_{run_id}.json"));

        write_portfolio_csv(&portfolio_csv, &portfolio)?;
        write_indicator_csv(&indicator_csv, &indicators)?;
        write_summary_json(&summary_json, run_id, &portfolio, &indicators)?;

        Ok(ExportSummary {
            portfolio_rows: portfolio.len(),
            indicator_rows: indicators.len(),
            files: vec![portfolio_csv, indicator_csv, summary_json],
        })
    }

    fn portfolio_rows(&self, run_id: &str) -> Result<Vec<PortfolioRow>, AppError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.bank_id, b.name AS bank_name, b.country, b.regulator,
                   s.score, s.rating, s.period, s.details
              FROM scores s
              JOIN banks b ON b.bank_id = s.bank_id
             WHERE s.run_id = ?1
             ORDER BY s.score DESC
            "#,
        )?;
        let rows = stmt.query_map([run_id], |row| {
            let details: Option<String> = row.get("details")?;
            Ok(PortfolioRow {
                bank_id: row.get("bank_id")?,
                bank_name: row.get("bank_name")?,
                country: row.get("country")?,
                regulator: row.get("regulator")?,
                score: row.get("score")?,
                rating: row.get("rating")?,
                period: row.get("period")?,
                metadata: details
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        })?;
        let mut portfolio = Vec::new();
        for row in rows {
            portfolio.push(row?);
        }
        Ok(portfolio)
    }

    fn indicator_rows(&self, run_id: &str) -> Result<Vec<IndicatorRow>, AppError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT i.bank_id, banks.name AS bank_name, i.indicator_id,
                   ind.name AS indicator_name, i.pillar, i.value, i.score,
                   i.rating, i.weight, i.period, i.unit, i.source_id,
                   i.normalization_run_id
              FROM indicator_scores i
              JOIN banks ON banks.bank_id = i.bank_id
         LEFT JOIN indicators ind ON ind.indicator_id = i.indicator_id
             WHERE i.run_id = ?1
             ORDER BY banks.name, i.pillar, ind.name
            "#,
        )?;
        let rows = stmt.query_map([run_id], |row| {
            Ok(IndicatorRow {
                bank_id: row.get("bank_id")?,
                bank_name: row.get("bank_name")?,
                indicator_id: row.get("indicator_id")?,
                indicator_name: row.get("indicator_name")?,
                pillar: row.get("pillar")?,
                value: row.get("value")?,
                score: row.get("score")?,
                rating: row.get("rating")?,
                weight: row.get("weight")?,
                period: row.get("period")?,
                unit: row.get("unit")?,
                source_id: row.get("source_id")?,
                normalization_run_id: row.get("normalization_run_id")?,
            })
        })?;
        let mut indicators = Vec::new();
        for row in rows {
            indicators.push(row?);
        }
        Ok(indicators)
    }
}

fn write_portfolio_csv(path: &Path, rows: &[PortfolioRow]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::external(format!("Failed to create '{}': {e}", path.display())))?;
    writer
        .write_record([
            "bank_id",
            "bank_name",
            "country",
            "regulator",
            "score",
            "rating",
            "period",
            "metadata",
        ])
        .map_err(|e| AppError::external(format!("Failed to write portfolio header: {e}")))?;
    for row in rows {
        writer
            .write_record([
                row.bank_id.as_str(),
                row.bank_name.as_str(),
                row.country.as_str(),
                row.regulator.as_str(),
                &format!("{:.4}", row.score),
                row.rating.as_str(),
                row.period.as_deref().unwrap_or(""),
                &row.metadata.to_string(),
            ])
            .map_err(|e| AppError::external(format!("Failed to write portfolio row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::external(format!("Failed to flush portfolio CSV: {e}")))?;
    Ok(())
}

fn write_indicator_csv(path: &Path, rows: &[IndicatorRow]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::external(format!("Failed to create '{}': {e}", path.display())))?;
    writer
        .write_record([
            "bank_id",
            "bank_name",
            "indicator_id",
            "indicator_name",
            "pillar",
            "value",
            "score",
            "rating",
            "weight",
            "period",
            "unit",
            "source_id",
            "normalization_run_id",
        ])
        .map_err(|e| AppError::external(format!("Failed to write indicator header: {e}")))?;
    for row in rows {
        writer
            .write_record([
                row.bank_id.as_str(),
                row.bank_name.as_str(),
                row.indicator_id.as_str(),
                row.indicator_name.as_deref().unwrap_or(""),
                row.pillar.as_str(),
                &row.value.map(|v| format!("{v:.6}")).unwrap_or_default(),
                &format!("{:.4}", row.score),
                row.rating.as_str(),
                &format!("{:.4}", row.weight),
                row.period.as_deref().unwrap_or(""),
                row.unit.as_deref().unwrap_or(""),
                row.source_id.as_deref().unwrap_or(""),
                row.normalization_run_id.as_deref().unwrap_or(""),
            ])
            .map_err(|e| AppError::external(format!("Failed to write indicator row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::external(format!("Failed to flush indicator CSV: {e}")))?;
    Ok(())
}

fn write_summary_json(
    path: &Path,
    run_id: &str,
    portfolio: &[PortfolioRow],
    indicators: &[IndicatorRow],
) -> Result<(), AppError> {
    let file = std::fs::File::create(path)
        .map_err(|e| AppError::external(format!("Failed to create '{}': {e}", path.display())))?;
    let summary = serde_json::json!({
        "run_id": run_id,
        "banks": portfolio.len(),
        "indicator_scores": indicators.len(),
        "portfolio": portfolio,
    });
    serde_json::to_writer_pretty(file, &summary)
        .map_err(|e| AppError::external(format!("Failed to write summary JSON: {e}")))?;
    Ok(())
}

/// Stage entry point.
pub fn run_stage(context: &StageContext) -> Result<(), AppError> {
    let conn = db::open(&context.settings.sqlite_path)?;
    db::ensure_schema(&conn)?;

    let generator = ExportGenerator::new(&conn, &context.settings.output_dir);
    let summary = generator.generate(&context.run_id)?;
    if summary.files.is_empty() {
        warn!("No scores found for run {}; nothing exported.", context.run_id);
        return Ok(());
    }
    info!(
        "Export complete: {} portfolio row(s), {} indicator row(s), {} file(s).",
        summary.portfolio_rows,
        summary.indicator_rows,
        summary.files.len()
    );
    Ok(())
}
