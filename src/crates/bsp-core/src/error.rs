//! Error types for the BSP engine
//!
//! Every failure the engine can observe maps onto one taxonomy entry:
//!
//! ```text
//! BspError
//! ├── InputSplit      - unreadable split or duplicate vertex id (fatal before superstep 0)
//! ├── Compute         - user compute callback failed (promoted to a worker failure)
//! ├── WorkerFailure   - task attempt died or reported out of step
//! ├── CheckpointIo    - durable store read/write failure
//! ├── BarrierTimeout  - no report within the barrier bound (promoted to a worker failure)
//! ├── Configuration   - invalid job configuration
//! ├── Plugin          - unknown or failing plug-in constructor
//! ├── Output          - output writer failure after completion
//! ├── Aggregator      - unknown aggregator or mismatched value type
//! ├── Aborted         - job cancelled through its handle
//! └── JobFailed       - terminal outcome of a failed job
//! ```
//!
//! Routing anomalies (messages to vertices that do not exist) are never raised;
//! they are counted in [`RoutingStats`](crate::router::RoutingStats).
//!
//! A failed job always surfaces as [`BspError::JobFailed`] carrying a
//! [`JobFailure`] that names the taxonomy entry, the partition and the
//! superstep where it happened:
//!
//! ```rust
//! use bsp_core::error::{BspError, FailureKind, JobFailure};
//! use bsp_core::PartitionId;
//!
//! let failure = JobFailure::new(FailureKind::WorkerFailure, "attempts exhausted")
//!     .with_partition(PartitionId(1))
//!     .with_superstep(4);
//! let err = BspError::JobFailed(failure);
//! assert_eq!(err.kind(), FailureKind::WorkerFailure);
//! assert!(err.to_string().contains("p1"));
//! ```

use crate::types::{PartitionId, Superstep, WorkerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error raised by a user compute callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ComputeError {
    pub message: String,
}

impl ComputeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ComputeError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ComputeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Taxonomy entry of a failure, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputSplit,
    Compute,
    WorkerFailure,
    CheckpointIo,
    BarrierTimeout,
    Configuration,
    Plugin,
    Output,
    Aggregator,
    Aborted,
    SuperstepLimit,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InputSplit => "InputSplitError",
            FailureKind::Compute => "ComputeError",
            FailureKind::WorkerFailure => "WorkerFailure",
            FailureKind::CheckpointIo => "CheckpointIOError",
            FailureKind::BarrierTimeout => "BarrierTimeout",
            FailureKind::Configuration => "ConfigurationError",
            FailureKind::Plugin => "PluginError",
            FailureKind::Output => "OutputError",
            FailureKind::Aggregator => "AggregatorError",
            FailureKind::Aborted => "Aborted",
            FailureKind::SuperstepLimit => "SuperstepLimit",
        };
        f.write_str(name)
    }
}

/// Why a job ended in FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub partition: Option<PartitionId>,
    pub superstep: Option<Superstep>,
    pub reason: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            partition: None,
            superstep: None,
            reason: reason.into(),
        }
    }

    pub fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_superstep(mut self, superstep: Superstep) -> Self {
        self.superstep = Some(superstep);
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(partition) = self.partition {
            write!(f, " in {}", partition)?;
        }
        if let Some(superstep) = self.superstep {
            write!(f, " at superstep {}", superstep)?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Errors that can occur while configuring or running a BSP job
#[derive(Debug, Error)]
pub enum BspError {
    /// Malformed or unreadable input split, or a vertex id produced twice
    #[error("Input split {split} failed: {reason}")]
    InputSplit { split: usize, reason: String },

    /// The compute callback failed for a vertex
    #[error("Compute failed for vertex {vertex} in {partition} at superstep {superstep}: {error}")]
    Compute {
        partition: PartitionId,
        superstep: Superstep,
        vertex: String,
        #[source]
        error: ComputeError,
    },

    /// A worker attempt died or reported out of step
    #[error("Worker {worker} (attempt {attempt}) failed: {reason}")]
    WorkerFailure {
        worker: WorkerId,
        attempt: u32,
        reason: String,
    },

    /// Durable store failure
    #[error("Checkpoint I/O failed: {0}")]
    CheckpointIo(#[from] bsp_checkpoint::CheckpointError),

    /// No report from a worker within the barrier bound
    #[error("Barrier timed out at superstep {superstep} waiting for {worker}")]
    BarrierTimeout { worker: WorkerId, superstep: Superstep },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unknown registry key or failing plug-in constructor
    #[error("Plug-in error: {0}")]
    Plugin(String),

    #[error("Output writer failed: {0}")]
    Output(String),

    #[error("Aggregator error: {0}")]
    Aggregator(String),

    #[error("Job aborted")]
    Aborted,

    #[error("Job failed: {0}")]
    JobFailed(JobFailure),
}

impl BspError {
    /// Taxonomy entry for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            BspError::InputSplit { .. } => FailureKind::InputSplit,
            BspError::Compute { .. } => FailureKind::Compute,
            BspError::WorkerFailure { .. } => FailureKind::WorkerFailure,
            BspError::CheckpointIo(_) => FailureKind::CheckpointIo,
            BspError::BarrierTimeout { .. } => FailureKind::BarrierTimeout,
            BspError::Configuration(_) => FailureKind::Configuration,
            BspError::Plugin(_) => FailureKind::Plugin,
            BspError::Output(_) => FailureKind::Output,
            BspError::Aggregator(_) => FailureKind::Aggregator,
            BspError::Aborted => FailureKind::Aborted,
            BspError::JobFailed(failure) => failure.kind,
        }
    }

    /// The failure record of a failed job, if this is one.
    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            BspError::JobFailed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Build the terminal [`JobFailure`] for this error.
    pub fn to_failure(&self) -> JobFailure {
        match self {
            BspError::JobFailed(failure) => failure.clone(),
            BspError::Compute {
                partition,
                superstep,
                ..
            } => JobFailure::new(self.kind(), self.to_string())
                .with_partition(*partition)
                .with_superstep(*superstep),
            BspError::BarrierTimeout { superstep, .. } => {
                JobFailure::new(self.kind(), self.to_string()).with_superstep(*superstep)
            }
            _ => JobFailure::new(self.kind(), self.to_string()),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        BspError::Configuration(msg.into())
    }

    pub fn plugin(msg: impl Into<String>) -> Self {
        BspError::Plugin(msg.into())
    }

    pub fn input_split(split: usize, reason: impl Into<String>) -> Self {
        BspError::InputSplit {
            split,
            reason: reason.into(),
        }
    }
}

/// Result type for BSP operations
pub type Result<T> = std::result::Result<T, BspError>;
