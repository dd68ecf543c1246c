//! # bsp-cli
//!
//! Argument parsing, job-file loading and summaries for the `bsp` binary.
//! Jobs are resolved through [`bsp_prebuilt::default_registry`].

use anyhow::{Context, Result};
use bsp_core::{BspJob, FileCheckpointStore, JobConfig, JobFailure, JobOutcome, JobPlugins};
use bsp_prebuilt::default_registry;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Prefix of the environment overrides applied to every job file.
pub const ENV_PREFIX: &str = "BSP";

#[derive(Parser, Debug)]
#[command(name = "bsp")]
#[command(about = "Run bulk-synchronous vertex programs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a job to completion and print a JSON summary
    Run(RunArgs),

    /// Load a job file, apply overrides and check it without running
    Validate(JobArgs),
}

#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Job file (YAML or JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Number of workers
    #[arg(short, long)]
    pub workers: Option<u32>,

    /// Write text output to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Keep checkpoints on disk under this directory instead of in memory
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
}

/// What `bsp run` prints.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunSummary {
    Completed {
        #[serde(flatten)]
        outcome: JobOutcome,
    },
    Failed {
        job_id: String,
        failure: JobFailure,
    },
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        matches!(self, RunSummary::Completed { .. })
    }
}

/// Load a job file and apply environment and command-line overrides.
pub fn load_job_config(args: &JobArgs) -> Result<JobConfig> {
    load_job_config_with(args, |key| std::env::var(key).ok())
}

/// [`load_job_config`] with an explicit environment lookup.
pub fn load_job_config_with<F>(args: &JobArgs, lookup: F) -> Result<JobConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = JobConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load job file {}", args.config.display()))?;
    config.apply_overrides_from(ENV_PREFIX, lookup)?;

    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(path) = &args.output {
        config.output_path = Some(path.clone());
        if config.output.is_none() {
            config.output = Some("text".to_string());
        }
    }

    config.validate()?;
    Ok(config)
}

/// Validate a job file, including that every plug-in key resolves.
pub fn validate_job(args: &JobArgs) -> Result<JobConfig> {
    let config = load_job_config(args)?;
    JobPlugins::resolve(&config, &default_registry())?;
    Ok(config)
}

/// Run `config` to the end.
///
/// Configuration and plug-in problems are errors; a job that starts and
/// then fails is reported as [`RunSummary::Failed`].
pub async fn run_job(config: JobConfig, checkpoint_dir: Option<PathBuf>) -> Result<RunSummary> {
    let job_id = config.job_id.clone();
    let mut job = BspJob::from_registry(config, &default_registry())?;
    if let Some(dir) = checkpoint_dir {
        tracing::info!(dir = %dir.display(), "Using file checkpoint store");
        job = job.with_checkpoint_store(Arc::new(FileCheckpointStore::new(dir)));
    }

    match job.run().await {
        Ok(outcome) => Ok(RunSummary::Completed { outcome }),
        Err(err) => Ok(RunSummary::Failed {
            job_id,
            failure: err.to_failure(),
        }),
    }
}
