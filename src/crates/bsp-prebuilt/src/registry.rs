//! The registry the CLI resolves job files through.
//!
//! | Kind | Key | Plug-in |
//! |---|---|---|
//! | compute | `page_rank` | [`PageRank`] (30 iterations) |
//! | compute | `superstep_counter` | [`SuperstepCounter`] |
//! | compute | `message_sum` | [`MessageSum`] |
//! | compute | `failing` | [`FailingCompute`] (fails at superstep 1) |
//! | compute | `shortest_paths` | [`ShortestPaths`] from vertex 0 |
//! | input | `generated` | [`GeneratedReader`] with `generated_vertices` |
//! | input | `page_rank_fixture` | [`FixtureReader::page_rank`] |
//! | output | `text` | [`TextWriter`] to `output_path` |
//! | combiner | `sum` / `min` | [`SumCombiner`] / [`MinCombiner`] |

use crate::combiner::{MinCombiner, SumCombiner};
use crate::compute::{FailingCompute, MessageSum, PageRank, ShortestPaths, SuperstepCounter};
use crate::reader::{FixtureReader, GeneratedReader};
use crate::writer::TextWriter;
use crate::DoubleGraph;
use bsp_core::{BspError, PluginRegistry};
use std::sync::Arc;

pub fn default_registry() -> PluginRegistry<DoubleGraph> {
    let mut registry = PluginRegistry::new();
    registry
        .register_compute("page_rank", |_| Ok(Arc::new(PageRank::default())))
        .register_compute("superstep_counter", |_| Ok(Arc::new(SuperstepCounter::default())))
        .register_compute("message_sum", |_| Ok(Arc::new(MessageSum)))
        .register_compute("failing", |_| Ok(Arc::new(FailingCompute::default())))
        .register_compute("shortest_paths", |_| Ok(Arc::new(ShortestPaths::default())));

    registry
        .register_reader("generated", |config| Ok(Arc::new(GeneratedReader::new(config.generated_vertices))))
        .register_reader("page_rank_fixture", |_| Ok(Arc::new(FixtureReader::page_rank())));

    registry.register_writer("text", |config| {
        let path = config
            .output_path
            .clone()
            .ok_or_else(|| BspError::plugin("text output needs output_path"))?;
        Ok(Arc::new(TextWriter::to_file(path)))
    });

    registry
        .register_combiner("sum", |_| Ok(Arc::new(SumCombiner)))
        .register_combiner("min", |_| Ok(Arc::new(MinCombiner)));
    registry
}
