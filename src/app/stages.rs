//! Pipeline stage wiring.
//!
//! Stages are described by an explicit ordered list built once at startup
//! and passed by reference — there is no global mutable registry, and tests
//! construct their own isolated instances.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::AppError;
use crate::settings::Settings;

/// Context passed to every stage run.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub settings: Settings,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub workspace: PathBuf,
}

pub type StageFn = fn(&StageContext) -> Result<(), AppError>;

/// Metadata about one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub run: StageFn,
}

/// An ordered, immutable list of stage descriptors.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
}

impl StageRegistry {
    pub fn new(stages: Vec<StageDefinition>) -> Self {
        Self { stages }
    }

    /// The standard pipeline, in execution order.
    pub fn standard() -> Self {
        Self::new(vec![
            StageDefinition {
                name: "ingest",
                description: "Download and parse every cataloged disclosure",
                run: crate::ingest::run_stage,
            },
            StageDefinition {
                name: "normalize",
                description: "Convert ingested artifacts into canonical indicator observations",
                run: crate::normalize::run_stage,
            },
            StageDefinition {
                name: "score",
                description: "Compute indicator/pillar/composite CAMELS ratings",
                run: crate::score::run_stage,
            },
            StageDefinition {
                name: "export",
                description: "Write consolidated portfolio and indicator reports",
                run: crate::export::run_stage,
            },
            StageDefinition {
                name: "audit",
                description: "Export the append-only audit trail for the run",
                run: crate::audit::run_stage,
            },
        ])
    }

    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter()
    }

    /// Validate a requested stage list, preserving order and dropping
    /// duplicates. An empty request means "all stages".
    pub fn resolve(&self, requested: &[String]) -> Result<Vec<&StageDefinition>, AppError> {
        if requested.is_empty() {
            return Ok(self.stages.iter().collect());
        }
        let unknown: Vec<&str> = requested
            .iter()
            .filter(|name| self.get(name).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(AppError::config(format!(
                "Unknown stages requested: {}",
                unknown.join(", ")
            )));
        }
        let mut resolved: Vec<&StageDefinition> = Vec::new();
        for name in requested {
            let stage = self.get(name).expect("validated above");
            if !resolved.iter().any(|existing| existing.name == stage.name) {
                resolved.push(stage);
            }
        }
        Ok(resolved)
    }
}

/// Executes stages sequentially against one context.
pub struct StageRunner<'a> {
    registry: &'a StageRegistry,
}

impl<'a> StageRunner<'a> {
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self { registry }
    }

    pub fn run(&self, stages: &[&StageDefinition], context: &StageContext) -> Result<(), AppError> {
        for stage in stages {
            info!(
                "Starting stage '{}' (run_id={}, timestamp={})",
                stage.name,
                context.run_id,
                context.timestamp.to_rfc3339()
            );
            let start = std::time::Instant::now();
            if let Err(err) = (stage.run)(context) {
                error!("Stage '{}' failed: {err}", stage.name);
                return Err(err);
            }
            info!(
                "Completed stage '{}' in {:.2}s",
                stage.name,
                start.elapsed().as_secs_f64()
            );
        }
        Ok(())
    }

    pub fn run_by_name(&self, names: &[String], context: &StageContext) -> Result<(), AppError> {
        let stages = self.registry.resolve(names)?;
        self.run(&stages, context)
    }
}
