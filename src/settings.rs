//! Environment-driven runtime settings.
//!
//! Everything configurable at deploy time comes from environment variables
//! (optionally via a `.env` file loaded at startup), so the same binary runs
//! unchanged in cron jobs, containers, and local shells.

use std::path::PathBuf;

use crate::error::AppError;

/// Runtime settings for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for downloaded artifacts (`raw/YYYYMMDD/...`) and reference data.
    pub data_dir: PathBuf,
    /// Destination for generated exports and audit files.
    pub output_dir: PathBuf,
    /// SQLite database holding every pipeline table.
    pub sqlite_path: PathBuf,
    /// YAML scoring configuration (thresholds, weights, defaults).
    pub scoring_config: PathBuf,
    /// Seed bank registry CSV.
    pub bank_registry: PathBuf,
    /// Source catalog YAML.
    pub source_catalog: PathBuf,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Settings {
    /// Load settings from the environment with sensible defaults.
    pub fn load() -> Self {
        let data_dir = PathBuf::from(env_or("CAMELS_DATA_DIR", "data"));
        Self {
            bank_registry: data_dir.join("reference").join("banks.csv"),
            data_dir,
            output_dir: PathBuf::from(env_or("CAMELS_OUTPUT_DIR", "artifacts")),
            sqlite_path: PathBuf::from(env_or("CAMELS_DB_PATH", "camels.sqlite")),
            scoring_config: PathBuf::from(env_or(
                "CAMELS_SCORING_CONFIG",
                "config/camels_thresholds.yaml",
            )),
            source_catalog: PathBuf::from(env_or("CAMELS_SOURCE_CATALOG", "config/sources.yaml")),
            log_level: env_or("LOG_LEVEL", "info"),
        }
    }

    /// Create the directories the pipeline writes into.
    pub fn ensure_directories(&self) -> Result<(), AppError> {
        let mut dirs = vec![self.data_dir.clone(), self.output_dir.clone()];
        if let Some(parent) = self.sqlite_path.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.push(parent.to_path_buf());
            }
        }
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::external(format!("Failed to create directory '{}': {e}", dir.display()))
            })?;
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
