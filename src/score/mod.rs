//! Scoring stage: latest snapshots → persisted composite ratings.

pub mod config;
pub mod engine;
pub mod repository;
pub mod store;

use tracing::{info, warn};

use crate::app::stages::StageContext;
use crate::audit::AuditStore;
use crate::db;
use crate::error::AppError;

use self::config::load_scoring_config;
use self::engine::ScoringEngine;
use self::repository::IndicatorRepository;
use self::store::ScoringStore;

/// Summary values from one scoring run.
#[derive(Debug, Clone, Default)]
pub struct ScoringRunSummary {
    pub banks_evaluated: usize,
    pub banks_with_data: usize,
    pub indicators_with_values: usize,
    pub latest_period: Option<String>,
}

/// Stage entry point.
pub fn run_stage(context: &StageContext) -> Result<(), AppError> {
    let summary = run_scoring(context)?;
    info!(
        "Scoring complete for {} bank(s) ({} with data); {} indicator value(s) evaluated, latest period {}.",
        summary.banks_evaluated,
        summary.banks_with_data,
        summary.indicators_with_values,
        summary.latest_period.as_deref().unwrap_or("n/a")
    );
    Ok(())
}

/// Execute the scoring pipeline and return its summary.
///
/// The configuration is loaded first so a structurally invalid file aborts
/// before any bank is touched; missing upstream data never does.
pub fn run_scoring(context: &StageContext) -> Result<ScoringRunSummary, AppError> {
    let scoring_config = load_scoring_config(&context.settings.scoring_config)?;

    let conn = db::open(&context.settings.sqlite_path)?;
    db::ensure_schema(&conn)?;

    let repository = IndicatorRepository::new(&conn);
    let banks = repository.bank_profiles()?;
    if banks.is_empty() {
        warn!("No banks available in registry; skipping scoring stage.");
        return Ok(ScoringRunSummary::default());
    }

    let snapshots = repository.latest_snapshots()?;
    let engine = ScoringEngine::new(scoring_config);
    let output = engine.score_all(&banks, &snapshots);

    let store = ScoringStore::new(&conn);
    store.persist(&context.run_id, &output.scores)?;

    let audit = AuditStore::new(&conn);
    audit.prepare_stage(&context.run_id, "score")?;
    audit.record_scores(&context.run_id, &output.scores)?;

    if output.banks_with_values < banks.len() {
        warn!(
            "{} bank(s) lacked sufficient indicator history for scoring.",
            banks.len() - output.banks_with_values
        );
    }

    Ok(ScoringRunSummary {
        banks_evaluated: banks.len(),
        banks_with_data: output.banks_with_values,
        indicators_with_values: output.indicators_with_values,
        latest_period: output.latest_period,
    })
}
