//! Messages between the coordinator and its workers.
//!
//! Commands flow coordinator → worker over one channel per worker attempt,
//! wrapped in a [`Directive`] that names the barrier round and the exchange
//! generation they belong to. Events flow back over a single shared channel
//! and always carry the attempt and round that produced them, so the
//! coordinator can ignore anything a superseded attempt or an abandoned
//! round still manages to send.

use crate::aggregator::AggregatedValues;
use crate::context::GraphTotals;
use crate::error::{FailureKind, JobFailure};
use crate::partition::PartitionReport;
use crate::plugin::InputSplit;
use crate::router::{Generation, RoutingStats};
use crate::types::{PartitionId, Superstep, WorkerId};
use std::fmt;
use std::sync::Arc;

/// Instruction from the coordinator.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Read these splits and ship vertices to their owning partitions
    Load { splits: Vec<InputSplit> },
    /// Build owned partitions from the shipped vertices
    Assemble,
    RunSuperstep {
        superstep: Superstep,
        totals: GraphTotals,
        aggregated: Arc<AggregatedValues>,
    },
    Checkpoint {
        superstep: Superstep,
        totals: GraphTotals,
        aggregated: Arc<AggregatedValues>,
    },
    Restore { superstep: Superstep },
    WriteOutput,
    Terminate,
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Load { .. } => "load",
            WorkerCommand::Assemble => "assemble",
            WorkerCommand::RunSuperstep { .. } => "run_superstep",
            WorkerCommand::Checkpoint { .. } => "checkpoint",
            WorkerCommand::Restore { .. } => "restore",
            WorkerCommand::WriteOutput => "write_output",
            WorkerCommand::Terminate => "terminate",
        }
    }
}

/// A command tagged with the round it opens and the exchange generation
/// the worker must read from and write to.
#[derive(Debug, Clone)]
pub struct Directive {
    pub round: u64,
    pub generation: Generation,
    pub command: WorkerCommand,
}

/// Counts for one assembled partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembledPartition {
    pub partition: PartitionId,
    pub vertices: u64,
    pub edges: u64,
}

/// What happened on a worker.
#[derive(Debug, Clone)]
pub enum WorkerEventKind {
    Loaded {
        vertices_read: u64,
    },
    Assembled {
        partitions: Vec<AssembledPartition>,
    },
    SuperstepDone {
        superstep: Superstep,
        reports: Vec<PartitionReport>,
        routing: RoutingStats,
    },
    CheckpointDone {
        superstep: Superstep,
        saved: Vec<PartitionId>,
        failed: Vec<(PartitionId, String)>,
    },
    Restored {
        superstep: Superstep,
        totals: GraphTotals,
        aggregated: AggregatedValues,
    },
    OutputWritten {
        records: u64,
    },
    /// The worker hit an error it cannot continue from
    Failed(JobFailure),
    /// The worker's process went away
    Terminated,
}

impl WorkerEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEventKind::Loaded { .. } => "loaded",
            WorkerEventKind::Assembled { .. } => "assembled",
            WorkerEventKind::SuperstepDone { .. } => "superstep_done",
            WorkerEventKind::CheckpointDone { .. } => "checkpoint_done",
            WorkerEventKind::Restored { .. } => "restored",
            WorkerEventKind::OutputWritten { .. } => "output_written",
            WorkerEventKind::Failed(_) => "failed",
            WorkerEventKind::Terminated => "terminated",
        }
    }

    /// Superstep the event refers to, for events tied to one.
    pub fn superstep(&self) -> Option<Superstep> {
        match self {
            WorkerEventKind::SuperstepDone { superstep, .. }
            | WorkerEventKind::CheckpointDone { superstep, .. }
            | WorkerEventKind::Restored { superstep, .. } => Some(*superstep),
            _ => None,
        }
    }
}

/// Event tagged with its source.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    pub worker: WorkerId,
    pub attempt: u32,
    /// Round of the directive being answered; 0 before the first one
    pub round: u64,
    pub kind: WorkerEventKind,
}

impl WorkerEvent {
    pub fn new(worker: WorkerId, attempt: u32, round: u64, kind: WorkerEventKind) -> Self {
        Self {
            worker,
            attempt,
            round,
            kind,
        }
    }
}

impl fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} r{} {}",
            self.worker,
            self.attempt,
            self.round,
            self.kind.name()
        )
    }
}

/// Requests a caller can make of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Abort,
    /// Simulate the worker's process dying
    KillWorker(WorkerId),
}

/// A worker fault detected by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerFault {
    pub worker: WorkerId,
    pub attempt: u32,
    pub failure: JobFailure,
}

impl WorkerFault {
    pub fn new(worker: WorkerId, attempt: u32, failure: JobFailure) -> Self {
        Self {
            worker,
            attempt,
            failure,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.failure.kind
    }

    /// Faults that no relaunch can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.failure.kind,
            FailureKind::InputSplit | FailureKind::Output | FailureKind::Configuration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_superstep() {
        let event = WorkerEvent::new(
            WorkerId(1),
            2,
            7,
            WorkerEventKind::CheckpointDone {
                superstep: 4,
                saved: vec![PartitionId(1)],
                failed: Vec::new(),
            },
        );
        assert_eq!(event.kind.superstep(), Some(4));
        assert_eq!(event.to_string(), "w1#2 r7 checkpoint_done");
        assert_eq!(WorkerEventKind::Terminated.superstep(), None);
    }

    #[test]
    fn test_fatal_faults() {
        let split = WorkerFault::new(
            WorkerId(0),
            1,
            JobFailure::new(FailureKind::InputSplit, "bad split"),
        );
        assert!(split.is_fatal());
        let died = WorkerFault::new(
            WorkerId(0),
            1,
            JobFailure::new(FailureKind::WorkerFailure, "killed"),
        );
        assert!(!died.is_fatal());
        assert_eq!(WorkerCommand::Assemble.name(), "assemble");
    }
}
