//! CLI for the batchget download manager.

mod commands;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{Context, Result};
use batchget_core::config;
use batchget_core::{CurlTransfer, JobManager, SqliteStore, UiSink};
use clap::{Parser, Subcommand};

use commands::{run_add, run_check, run_export, run_import, run_jobs, run_status};

/// Top-level CLI for the batchget download manager.
#[derive(Debug, Parser)]
#[command(name = "batchget")]
#[command(about = "batchget: multi-file download jobs with resumable transfers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create a job with one file per URL.
    Add {
        /// Job name (unique).
        name: String,
        /// Target folder (default: <download_dir>/<name>).
        #[arg(long, value_name = "FOLDER")]
        dir: Option<PathBuf>,
        /// Direct HTTP/HTTPS URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Show all jobs, or the files of one job.
    Status {
        /// Job identifier.
        id: Option<i64>,
    },

    /// Resume interrupted work, start jobs, and wait until nothing is active.
    Run {
        /// Only start this job (default: every unfinished job).
        #[arg(long, value_name = "ID")]
        job: Option<i64>,
        /// Worker threads per started job.
        #[arg(long, value_name = "N")]
        threads: Option<usize>,
    },

    /// Verify completed files of a job against their recorded sizes.
    Check {
        /// Job identifier.
        id: i64,
    },

    /// Write a job definition to a JSON file.
    Export {
        /// Job identifier.
        id: i64,
        /// Output path.
        path: PathBuf,
    },

    /// Create a job from an exported JSON file.
    Import {
        /// Path to the export.
        path: PathBuf,
    },
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db_path = cfg.database_path()?;
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("open database {}", db_path.display()))?;

        let (tx, rx) = mpsc::channel();
        let manager = JobManager::new(
            cfg,
            Box::new(store),
            Arc::new(CurlTransfer::new()),
            UiSink::new(tx),
        )?;

        let result = match cli.command {
            CliCommand::Add { name, dir, urls } => run_add(&manager, &name, dir.as_deref(), &urls),
            CliCommand::Status { id } => run_status(&manager, id),
            CliCommand::Run { job, threads } => run_jobs(&manager, &rx, job, threads),
            CliCommand::Check { id } => run_check(&manager, &rx, id),
            CliCommand::Export { id, path } => run_export(&manager, id, &path),
            CliCommand::Import { path } => run_import(&manager, &path),
        };
        manager.shutdown();
        result
    }
}

#[cfg(test)]
mod tests;
