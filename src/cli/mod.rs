//! Command-line parsing for the CAMELS pipeline.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the pipeline logic.

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "camels", version, about = "Bank regulatory disclosure ingestion and CAMELS scoring")]
pub struct Cli {
    /// Run identifier shared by every stage in this invocation.
    ///
    /// Defaults to a fresh UUID. Reusing a previous run id makes the stages
    /// idempotently replace that run's rows instead of appending new ones.
    #[arg(long, global = true)]
    pub run_id: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline, or only the stages listed (in the given order).
    Run {
        /// Optional ordered list of stages instead of all registered stages.
        stages: Vec<String>,
    },
    /// List the registered pipeline stages.
    Stages,
    /// Download and parse every cataloged disclosure.
    Ingest,
    /// Normalize the latest ingested artifacts into indicator observations.
    Normalize,
    /// Compute indicator/pillar/composite CAMELS ratings.
    Score,
    /// Write consolidated portfolio and indicator reports.
    Export,
    /// Export the audit trail for the run.
    Audit,
}
