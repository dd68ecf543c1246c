//! Job configuration
//!
//! A job is described by a [`JobConfig`]: which plug-ins to resolve from the
//! registry, how many workers and partitions to run, the checkpoint cadence
//! and the failure budget. Every field has a default, so a file only needs
//! the plug-in keys:
//!
//! ```yaml
//! compute: page_rank
//! input: fixture
//! workers: 2
//! checkpoint_frequency: 2
//! ```
//!
//! Loading order used by the CLI: file, then environment overrides, then
//! command-line flags, then [`JobConfig::validate`].

use crate::error::{BspError, Result};
use crate::retry::RetryPolicy;
use bsp_checkpoint::CheckpointCodec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

fn default_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_one() -> u32 {
    1
}

fn default_split_multiplier() -> f64 {
    1.0
}

fn default_max_attempts() -> u32 {
    4
}

fn default_barrier_timeout_ms() -> u64 {
    600_000
}

fn default_generated_vertices() -> u64 {
    10
}

/// Configuration of one BSP job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Namespace for checkpoint keys
    #[serde(default = "default_job_id")]
    pub job_id: String,

    /// Vertex-compute registry key
    #[serde(default)]
    pub compute: String,

    /// Input-reader registry key
    #[serde(default)]
    pub input: String,

    /// Output-writer registry key
    #[serde(default)]
    pub output: Option<String>,

    /// Combiner registry key
    #[serde(default)]
    pub combiner: Option<String>,

    /// Number of simulated worker processes
    #[serde(default = "default_one")]
    pub workers: u32,

    #[serde(default = "default_one")]
    pub partitions_per_worker: u32,

    /// Input splits = ceil(split_multiplier × workers), at least one
    #[serde(default = "default_split_multiplier")]
    pub split_multiplier: f64,

    /// Checkpoint every K supersteps; 0 disables checkpointing
    #[serde(default)]
    pub checkpoint_frequency: u64,

    /// Task attempts per worker before the job fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Bound on each barrier wait
    #[serde(default = "default_barrier_timeout_ms")]
    pub barrier_timeout_ms: u64,

    /// Fail the job instead of running past this many supersteps
    #[serde(default)]
    pub max_supersteps: Option<u64>,

    /// Vertex count for the generated input reader
    #[serde(default = "default_generated_vertices")]
    pub generated_vertices: u64,

    #[serde(default)]
    pub checkpoint_codec: CheckpointCodec,

    /// Destination for file-backed output writers
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    #[serde(default)]
    pub relaunch_backoff: RetryPolicy,

    /// Leave the job's checkpoints in the store after it completes
    #[serde(default)]
    pub keep_checkpoints: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_id: default_job_id(),
            compute: String::new(),
            input: String::new(),
            output: None,
            combiner: None,
            workers: default_one(),
            partitions_per_worker: default_one(),
            split_multiplier: default_split_multiplier(),
            checkpoint_frequency: 0,
            max_attempts: default_max_attempts(),
            barrier_timeout_ms: default_barrier_timeout_ms(),
            max_supersteps: None,
            generated_vertices: default_generated_vertices(),
            checkpoint_codec: CheckpointCodec::default(),
            output_path: None,
            relaunch_backoff: RetryPolicy::default(),
            keep_checkpoints: false,
        }
    }
}

impl JobConfig {
    pub fn new(compute: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            compute: compute.into(),
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_combiner(mut self, combiner: impl Into<String>) -> Self {
        self.combiner = Some(combiner.into());
        self
    }

    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_partitions_per_worker(mut self, partitions: u32) -> Self {
        self.partitions_per_worker = partitions;
        self
    }

    pub fn with_split_multiplier(mut self, multiplier: f64) -> Self {
        self.split_multiplier = multiplier;
        self
    }

    pub fn with_checkpoint_frequency(mut self, every: u64) -> Self {
        self.checkpoint_frequency = every;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_max_supersteps(mut self, max: u64) -> Self {
        self.max_supersteps = Some(max);
        self
    }

    pub fn with_generated_vertices(mut self, count: u64) -> Self {
        self.generated_vertices = count;
        self
    }

    pub fn with_checkpoint_codec(mut self, codec: CheckpointCodec) -> Self {
        self.checkpoint_codec = codec;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_relaunch_backoff(mut self, policy: RetryPolicy) -> Self {
        self.relaunch_backoff = policy;
        self
    }

    pub fn with_keep_checkpoints(mut self, keep: bool) -> Self {
        self.keep_checkpoints = keep;
        self
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn num_partitions(&self) -> u32 {
        self.workers.saturating_mul(self.partitions_per_worker)
    }

    /// Number of input splits handed to the reader.
    pub fn num_splits(&self) -> usize {
        let splits = (self.split_multiplier * self.workers as f64).ceil();
        if splits.is_finite() && splits >= 1.0 {
            splits as usize
        } else {
            1
        }
    }

    /// Whether a checkpoint is written at `superstep`.
    pub fn is_checkpoint_superstep(&self, superstep: u64) -> bool {
        self.checkpoint_frequency > 0 && superstep % self.checkpoint_frequency == 0
    }

    /// Load from a YAML (`.yaml`/`.yml`) or JSON (`.json`) file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_config_file(path)
    }

    /// Apply `<PREFIX>_WORKERS`, `<PREFIX>_CHECKPOINT_FREQUENCY`,
    /// `<PREFIX>_MAX_ATTEMPTS`, `<PREFIX>_BARRIER_TIMEOUT_MS` and
    /// `<PREFIX>_SPLIT_MULTIPLIER` from the process environment.
    pub fn apply_env_overrides(&mut self, prefix: &str) -> Result<()> {
        self.apply_overrides_from(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// explicit lookup.
    pub fn apply_overrides_from<F>(&mut self, prefix: &str, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |name: &str| format!("{}_{}", prefix, name);

        if let Some(v) = parse_override(&lookup, &key("WORKERS"))? {
            self.workers = v;
        }
        if let Some(v) = parse_override(&lookup, &key("CHECKPOINT_FREQUENCY"))? {
            self.checkpoint_frequency = v;
        }
        if let Some(v) = parse_override(&lookup, &key("MAX_ATTEMPTS"))? {
            self.max_attempts = v;
        }
        if let Some(v) = parse_override(&lookup, &key("BARRIER_TIMEOUT_MS"))? {
            self.barrier_timeout_ms = v;
        }
        if let Some(v) = parse_override(&lookup, &key("SPLIT_MULTIPLIER"))? {
            self.split_multiplier = v;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(BspError::configuration("job_id must not be empty"));
        }
        if self.compute.trim().is_empty() {
            return Err(BspError::configuration("compute plug-in key is required"));
        }
        if self.input.trim().is_empty() {
            return Err(BspError::configuration("input plug-in key is required"));
        }
        for (name, key) in [("output", &self.output), ("combiner", &self.combiner)] {
            if matches!(key, Some(k) if k.trim().is_empty()) {
                return Err(BspError::configuration(format!(
                    "{} plug-in key must not be empty",
                    name
                )));
            }
        }
        if self.workers == 0 {
            return Err(BspError::configuration("workers must be at least 1"));
        }
        if self.partitions_per_worker == 0 {
            return Err(BspError::configuration(
                "partitions_per_worker must be at least 1",
            ));
        }
        if !(self.split_multiplier.is_finite() && self.split_multiplier > 0.0) {
            return Err(BspError::configuration(format!(
                "split_multiplier must be positive, got {}",
                self.split_multiplier
            )));
        }
        if self.max_attempts == 0 {
            return Err(BspError::configuration("max_attempts must be at least 1"));
        }
        if self.barrier_timeout_ms == 0 {
            return Err(BspError::configuration("barrier_timeout_ms must be positive"));
        }
        self.relaunch_backoff
            .validate()
            .map_err(|reason| BspError::configuration(format!("relaunch_backoff: {}", reason)))?;
        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            BspError::configuration(format!(
                "Failed to parse environment variable '{}': {}",
                key, e
            ))
        }),
    }
}

/// Load a YAML config file.
pub fn load_yaml_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = read_config(path)?;
    serde_yaml::from_str(&content).map_err(|e| {
        BspError::configuration(format!("Failed to parse YAML config from {:?}: {}", path, e))
    })
}

/// Load a JSON config file.
pub fn load_json_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = read_config(path)?;
    serde_json::from_str(&content).map_err(|e| {
        BspError::configuration(format!("Failed to parse JSON config from {:?}: {}", path, e))
    })
}

/// Load a config file, picking the format from the extension.
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            BspError::configuration(format!("Unable to determine file extension for {:?}", path))
        })?;

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => load_yaml_config(path),
        "json" => load_json_config(path),
        other => Err(BspError::configuration(format!(
            "Unsupported config file extension: {}",
            other
        ))),
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| BspError::configuration(format!("Failed to read {:?}: {}", path, e)))
}
