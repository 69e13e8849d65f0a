//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and settings
//! - initializes logging
//! - parses CLI arguments
//! - builds the stage registry and dispatches commands

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::AppError;
use crate::settings::Settings;

pub mod stages;

use self::stages::{StageContext, StageRegistry, StageRunner};

/// Entry point for the `camels` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let settings = Settings::load();
    init_logging(&settings);

    let cli = Cli::parse();
    let registry = StageRegistry::standard();
    let runner = StageRunner::new(&registry);
    let context = build_context(settings, cli.run_id)?;

    match cli.command {
        Command::Run { stages } => runner.run_by_name(&stages, &context),
        Command::Stages => {
            println!("Registered stages:");
            for stage in registry.iter() {
                println!("- {}: {}", stage.name, stage.description);
            }
            Ok(())
        }
        Command::Ingest => runner.run_by_name(&["ingest".to_string()], &context),
        Command::Normalize => runner.run_by_name(&["normalize".to_string()], &context),
        Command::Score => runner.run_by_name(&["score".to_string()], &context),
        Command::Export => runner.run_by_name(&["export".to_string()], &context),
        Command::Audit => runner.run_by_name(&["audit".to_string()], &context),
    }
}

fn build_context(settings: Settings, run_id: Option<String>) -> Result<StageContext, AppError> {
    settings.ensure_directories()?;
    let workspace = std::env::current_dir()
        .map_err(|e| AppError::external(format!("Failed to resolve working directory: {e}")))?;
    Ok(StageContext {
        settings,
        run_id: run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        timestamp: Utc::now(),
        workspace,
    })
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    // A second init (e.g. in tests) is harmless; ignore the error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
