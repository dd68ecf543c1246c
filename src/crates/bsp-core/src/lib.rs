//! # bsp-core - Vertex-centric bulk synchronous parallel graph engine
//!
//! A job loads a graph through an input reader, spreads its vertices over
//! partitions owned by a fixed set of workers, and then runs supersteps:
//! every active vertex (or halted vertex with mail) runs the user's compute
//! function, sends messages and contributes to aggregators; a global barrier
//! separates one superstep from the next.
//!
//! ## Guarantees
//!
//! - **Strict barrier**: no partition starts superstep `S + 1` before every
//!   partition has reported `S`. Messages sent in `S` are visible in `S + 1`
//!   and never earlier.
//! - **Halting**: the job completes when, after a full barrier, no vertex is
//!   active and no message was sent.
//! - **Combiner transparency**: a commutative and associative combiner only
//!   reduces message volume.
//! - **Recovery**: a failed worker is relaunched and every partition rolls
//!   back to the newest complete checkpoint, up to `max_attempts` per worker.
//!
//! ## Pieces
//!
//! | Module | Role |
//! |---|---|
//! | [`partitioner`] | vertex id → partition, partition → worker |
//! | [`router`] | per-worker outbox with optional combining, shared exchange |
//! | [`aggregator`] | named typed accumulators merged once per superstep |
//! | [`checkpoint`] | partition snapshots over a [`bsp_checkpoint::CheckpointStore`] |
//! | [`coordinator`] | barrier, halting check, checkpoint cadence, recovery |
//! | [`job`] | [`BspJob`] builder, [`JobHandle`], [`JobOutcome`] |
//! | [`plugin`] | compute / reader / writer / combiner contracts and registry |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use bsp_core::{BspJob, JobConfig};
//!
//! let config = JobConfig::new("superstep_counter", "generated")
//!     .with_workers(2)
//!     .with_checkpoint_frequency(2);
//! let outcome = BspJob::from_registry(config, &bsp_prebuilt::default_registry())?
//!     .run()
//!     .await?;
//! assert_eq!(outcome.supersteps, 5);
//! ```

pub mod aggregator;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod fault;
pub mod job;
pub mod partition;
pub mod partitioner;
pub mod plugin;
pub mod protocol;
pub mod retry;
pub mod router;
pub mod types;
mod worker;

pub use aggregator::{
    AggregateValue, AggregatedValues, Aggregator, AggregatorRegistry, BooleanAnd, BooleanOr,
    DoubleMax, DoubleMin, DoubleSum, FnAggregator, LongSum,
};
pub use config::JobConfig;
pub use context::{ComputeContext, GraphTotals, SuperstepContext};
pub use coordinator::{JobProgress, JobState, WorkerStatus};
pub use error::{BspError, ComputeError, FailureKind, JobFailure, Result};
pub use fault::{FaultAction, FaultInjector, NoFaults, ScriptedFaults};
pub use job::{BspJob, JobHandle, JobOutcome, JobStats};
pub use partitioner::{HashPartitioner, PartitionLayout, Partitioner};
pub use plugin::{
    Combiner, InputSplit, JobPlugins, PluginRegistry, VertexCompute, VertexInputReader,
    VertexOutputWriter, VertexStream,
};
pub use retry::RetryPolicy;
pub use router::RoutingStats;
pub use types::{
    Edge, Envelope, GraphTypes, Message, PartitionId, Superstep, Vertex, VertexRecord, WorkerId,
};

pub use bsp_checkpoint::{CheckpointCodec, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
