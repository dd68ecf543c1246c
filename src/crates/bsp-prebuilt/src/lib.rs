//! # bsp-prebuilt - Ready-made plug-ins for bsp-core
//!
//! Everything here works on [`DoubleGraph`]: `u64` ids, `f64` values and
//! messages, `f32` edge weights.
//!
//! - [`compute`] - PageRank, superstep counter, message sum, a failing
//!   program for failure tests, single-source shortest paths
//! - [`combiner`] - sum and min message combiners
//! - [`reader`] - generated ring graph and in-memory fixtures
//! - [`writer`] - tab-separated text output and an in-memory writer
//! - [`registry`] - [`default_registry`] mapping config keys to all of the above
//!
//! ```rust,ignore
//! use bsp_core::{BspJob, JobConfig};
//! use bsp_prebuilt::default_registry;
//!
//! let config = JobConfig::new("page_rank", "page_rank_fixture").with_workers(2);
//! let outcome = BspJob::from_registry(config, &default_registry())?.run().await?;
//! let max = outcome.aggregates.get_double("max");
//! ```

pub mod combiner;
pub mod compute;
pub mod reader;
pub mod registry;
pub mod writer;

use bsp_core::GraphTypes;

/// Graph with `u64` ids, `f64` values and messages, `f32` edge weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleGraph;

impl GraphTypes for DoubleGraph {
    type Id = u64;
    type Value = f64;
    type Edge = f32;
    type Message = f64;
}

pub use combiner::{MinCombiner, SumCombiner};
pub use compute::{FailingCompute, MessageSum, PageRank, ShortestPaths, SuperstepCounter, UNREACHED};
pub use reader::{FixtureReader, GeneratedReader};
pub use registry::default_registry;
pub use writer::{format_record, MemoryWriter, TextWriter};
