//! Ingestion stage: download every cataloged disclosure, parse it, and log
//! the outcome.
//!
//! Sources are independent, so download+parse fans out across a thread pool;
//! database writes stay on the calling thread. A source that fails to
//! download or parse produces a `failed` log row with the error text; the
//! stage itself still completes.

pub mod download;
pub mod log;
pub mod parse;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::app::stages::StageContext;
use crate::audit::AuditStore;
use crate::catalog::{self, SourceDefinition};
use crate::db;
use crate::error::AppError;

use self::download::{DownloadOptions, download_source};
use self::log::{IngestionLogEntry, IngestionStore, STATUS_FAILED, STATUS_SUCCESS};

/// Outcome counts for one ingestion run.
#[derive(Debug, Clone, Copy)]
pub struct IngestionSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Stage entry point.
pub fn run_stage(context: &StageContext) -> Result<(), AppError> {
    let summary = run_ingestion(context)?;
    info!(
        "Ingestion complete for run {}: {} source(s) processed, {} failed.",
        context.run_id, summary.processed, summary.failed
    );
    Ok(())
}

/// Execute the ingestion pipeline and return its summary.
pub fn run_ingestion(context: &StageContext) -> Result<IngestionSummary, AppError> {
    context.settings.ensure_directories()?;
    let sources = catalog::load_catalog(&context.settings.source_catalog)?;
    info!("Loaded {} sources from catalog", sources.len());

    let raw_dir = context
        .settings
        .data_dir
        .join("raw")
        .join(context.timestamp.format("%Y%m%d").to_string());

    let options = DownloadOptions::default();
    let entries: Vec<IngestionLogEntry> = sources
        .par_iter()
        .map(|source| process_source(source, &raw_dir, &options, &context.run_id))
        .collect();

    let conn = db::open(&context.settings.sqlite_path)?;
    db::ensure_schema(&conn)?;
    let store = IngestionStore::new(&conn);
    for entry in &entries {
        store.record(entry)?;
        info!(
            "Recorded ingestion for {} with status {}",
            entry.source_id, entry.status
        );
    }

    let audit = AuditStore::new(&conn);
    audit.prepare_stage(&context.run_id, "ingest")?;
    audit.record_ingestions(&context.run_id, &entries)?;

    let failed = entries.iter().filter(|entry| !entry.is_success()).count();
    Ok(IngestionSummary {
        processed: entries.len() - failed,
        failed,
    })
}

fn process_source(
    source: &SourceDefinition,
    raw_dir: &std::path::Path,
    options: &DownloadOptions,
    run_id: &str,
) -> IngestionLogEntry {
    info!(
        "Processing source {} for bank {} ({})",
        source.id, source.bank, source.country
    );
    let started_at = Utc::now();

    let outcome = download_source(source, raw_dir, options)
        .and_then(|download| parse::parse_file(&download.path, source).map(|d| (download, d)));

    match outcome {
        Ok((download, dataset)) => IngestionLogEntry {
            run_id: run_id.to_string(),
            source_id: source.id.clone(),
            bank: source.bank.clone(),
            country: source.country.clone(),
            regulator: source.regulator.clone(),
            url: source.url.clone(),
            format: source.format.as_str().to_string(),
            frequency: source.frequency.clone(),
            local_path: download.path.display().to_string(),
            checksum: download.sha256,
            record_count: dataset.row_count() as i64,
            status: STATUS_SUCCESS.to_string(),
            error: None,
            started_at,
            completed_at: Utc::now(),
            metadata: serde_json::json!({
                "indicators": source.indicators,
                "content_type": download.content_type,
                "size_bytes": download.size_bytes,
                "parse_summary": {
                    "rows": dataset.row_count(),
                    "metadata": dataset.metadata,
                },
            }),
        },
        Err(err) => {
            warn!("Failed to process source {}: {err}", source.id);
            IngestionLogEntry {
                run_id: run_id.to_string(),
                source_id: source.id.clone(),
                bank: source.bank.clone(),
                country: source.country.clone(),
                regulator: source.regulator.clone(),
                url: source.url.clone(),
                format: source.format.as_str().to_string(),
                frequency: source.frequency.clone(),
                local_path: String::new(),
                checksum: String::new(),
                record_count: 0,
                status: STATUS_FAILED.to_string(),
                error: Some(err.to_string()),
                started_at,
                completed_at: Utc::now(),
                metadata: serde_json::json!({ "indicators": source.indicators }),
            }
        }
    }
}
