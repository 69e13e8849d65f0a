//! Normalization stage: latest ingested artifacts → canonical observations.

pub mod banks;
pub mod indicators;
pub mod period;
pub mod store;
pub mod transform;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::app::stages::StageContext;
use crate::audit::AuditStore;
use crate::catalog;
use crate::db;
use crate::domain::IngestionProvenance;
use crate::error::AppError;
use crate::ingest::log::IngestionStore;
use crate::ingest::parse::parse_file;

use self::indicators::IndicatorCatalog;
use self::store::NormalizedStore;
use self::transform::NormalizationTransformer;

/// How many distinct periods a (bank, indicator) pair should carry before
/// coverage stops being flagged.
const MINIMUM_PERIODS: i64 = 8;

/// Outcome counts for one normalization run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizationRunSummary {
    pub processed_sources: usize,
    pub normalized_records: usize,
    pub updated_records: usize,
    pub skipped_sources: usize,
}

/// Stage entry point.
pub fn run_stage(context: &StageContext) -> Result<(), AppError> {
    let summary = run_normalization(context)?;
    info!(
        "Normalization complete for run {}: {} source(s) processed, {} record(s) inserted, {} updated, {} skipped.",
        context.run_id,
        summary.processed_sources,
        summary.normalized_records,
        summary.updated_records,
        summary.skipped_sources
    );
    Ok(())
}

/// Execute the normalization pipeline and return its summary.
pub fn run_normalization(context: &StageContext) -> Result<NormalizationRunSummary, AppError> {
    let conn = db::open(&context.settings.sqlite_path)?;
    db::ensure_schema(&conn)?;

    let seed_banks = banks::load_seed_banks(&context.settings.bank_registry)?;
    if seed_banks.len() < 50 {
        warn!(
            "Seed bank registry contains {} entries; expected > 50.",
            seed_banks.len()
        );
    }
    banks::sync_banks(&conn, &seed_banks)?;

    let indicator_catalog = IndicatorCatalog::standard();
    indicators::sync_indicator_catalog(&conn, &indicator_catalog)?;
    let bank_map = banks::bank_lookup(&seed_banks);

    let ingestion_store = IngestionStore::new(&conn);
    let latest = ingestion_store.latest_successful()?;
    if latest.is_empty() {
        warn!("No successful ingestion runs found; nothing to normalize.");
        return Ok(NormalizationRunSummary::default());
    }

    let definitions = catalog::load_catalog(&context.settings.source_catalog)?;
    let store = NormalizedStore::new(&conn);
    let audit = AuditStore::new(&conn);
    audit.prepare_stage(&context.run_id, "normalize")?;
    let transformer = NormalizationTransformer::new(&indicator_catalog, &bank_map);

    let mut summary = NormalizationRunSummary::default();
    for (source_id, ingestion) in &latest {
        let Some(definition) = definitions.iter().find(|d| &d.id == source_id) else {
            warn!("Source {source_id} missing from catalog; skipping normalization.");
            summary.skipped_sources += 1;
            continue;
        };
        let local_path = resolve_local_path(
            Path::new(&ingestion.local_path),
            &context.workspace,
        );
        if !local_path.exists() {
            warn!("Ingested file {} not found; skipping.", local_path.display());
            summary.skipped_sources += 1;
            continue;
        }

        let dataset = match parse_file(&local_path, definition) {
            Ok(dataset) => dataset,
            Err(err) => {
                warn!("Failed to re-parse {}: {err}; skipping.", local_path.display());
                summary.skipped_sources += 1;
                continue;
            }
        };

        let provenance = IngestionProvenance {
            run_id: Some(ingestion.run_id.clone()),
            checksum: Some(ingestion.checksum.clone()),
        };
        let records = transformer.transform(&dataset, definition, &provenance, &context.run_id);
        if records.is_empty() {
            warn!(
                "No indicators extracted for source {source_id} ({}).",
                definition.bank
            );
            summary.skipped_sources += 1;
            continue;
        }

        let batch = store.upsert(&records)?;
        for record in &records {
            store.log_event(
                &record.run_id,
                &record.source_id,
                &record.bank_id,
                &record.indicator_id,
                &record.period,
                "success",
                None,
            )?;
        }
        audit.record_observations(&context.run_id, &records)?;

        summary.processed_sources += 1;
        summary.normalized_records += batch.inserted;
        summary.updated_records += batch.updated;
        info!(
            "Normalized {} record(s) for {} ({source_id}); {} inserted, {} updated.",
            records.len(),
            definition.bank,
            batch.inserted,
            batch.updated
        );
    }

    warn_on_coverage(&store)?;
    Ok(summary)
}

fn resolve_local_path(local_path: &Path, workspace: &Path) -> PathBuf {
    if local_path.exists() || local_path.is_absolute() {
        return local_path.to_path_buf();
    }
    let candidate = workspace.join(local_path);
    if candidate.exists() {
        candidate
    } else {
        local_path.to_path_buf()
    }
}

fn warn_on_coverage(store: &NormalizedStore<'_>) -> Result<(), AppError> {
    for entry in store.coverage()? {
        if entry.periods < MINIMUM_PERIODS {
            warn!(
                "Bank {} indicator {} has only {} period(s); minimum expected is {MINIMUM_PERIODS}.",
                entry.bank_id, entry.indicator_id, entry.periods
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::catalog::{SourceDefinition, SourceFormat};
    use crate::domain::{BankRecord, ParsedDataset, ParsedRow};
    use crate::score::repository::IndicatorRepository;

    use super::*;

    fn registry() -> Vec<BankRecord> {
        vec![BankRecord {
            bank_id: "gt-bi".to_string(),
            name: "Banco Industrial, S.A.".to_string(),
            country: "Guatemala".to_string(),
            regulator: "SIB".to_string(),
        }]
    }

    fn source() -> SourceDefinition {
        SourceDefinition {
            id: "sib-gt-bi-ratios".to_string(),
            name: "SIB quarterly ratios".to_string(),
            country: "Guatemala".to_string(),
            regulator: "SIB".to_string(),
            bank: "Banco Industrial, S.A.".to_string(),
            url: "https://example.com/bi.csv".to_string(),
            format: SourceFormat::Csv,
            frequency: "quarterly".to_string(),
            indicators: vec!["CET1/RWA".to_string()],
            description: None,
            encoding: None,
            worksheet: None,
        }
    }

    fn dataset(cet1: &str) -> ParsedDataset {
        ParsedDataset {
            rows: vec![ParsedRow::new(vec![
                ("Year".to_string(), "2024".to_string()),
                ("Quarter".to_string(), "Q1".to_string()),
                ("CET1/RWA".to_string(), cet1.to_string()),
            ])],
            metadata: Default::default(),
        }
    }

    #[test]
    fn transform_upsert_snapshot_chain_is_idempotent_per_run() {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();

        let seed = registry();
        banks::sync_banks(&conn, &seed).unwrap();
        let catalog = IndicatorCatalog::standard();
        indicators::sync_indicator_catalog(&conn, &catalog).unwrap();
        let lookup = banks::bank_lookup(&seed);

        let transformer = NormalizationTransformer::new(&catalog, &lookup);
        let provenance = IngestionProvenance {
            run_id: Some("ing-run".to_string()),
            checksum: Some("abc".to_string()),
        };
        let store = NormalizedStore::new(&conn);

        // Same dataset twice under one run id: one row, replaced in place.
        let records = transformer.transform(&dataset("12%"), &source(), &provenance, "run-1");
        store.upsert(&records).unwrap();
        let records = transformer.transform(&dataset("12%"), &source(), &provenance, "run-1");
        let second = store.upsert(&records).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indicator_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // A later run appends history; the snapshot resolves to the new row.
        let records = transformer.transform(&dataset("13%"), &source(), &provenance, "run-2");
        store.upsert(&records).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indicator_history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let snapshots = IndicatorRepository::new(&conn).latest_snapshots().unwrap();
        let snapshot = &snapshots["gt-bi"]["cet1_rwa"];
        assert_eq!(snapshot.period.as_deref(), Some("2024Q1"));
        assert_eq!(snapshot.normalization_run_id.as_deref(), Some("run-2"));
        assert!((snapshot.value.unwrap() - 0.13).abs() < 1e-12);
        assert_eq!(snapshot.metadata["checksum"], "abc");
    }
}
