//! Vertex programs over [`DoubleGraph`].

use crate::DoubleGraph;
use bsp_core::{
    AggregatorRegistry, ComputeContext, ComputeError, DoubleMax, DoubleMin, LongSum, Result,
    VertexCompute,
};

type Ctx<'a> = ComputeContext<'a, DoubleGraph>;
type Outcome = std::result::Result<(), ComputeError>;

/// Damped PageRank with a fixed iteration count.
///
/// From superstep 1 on, a vertex's rank is
/// `0.15 / N + 0.85 × Σ incoming`, where the constant term is computed in
/// single precision. Ranks are spread evenly over out-edges until
/// `iterations` is reached, then every vertex halts.
///
/// Aggregators: `max` and `min` (double) over the ranks of the superstep,
/// `sum` (long) counting the vertices that contributed.
#[derive(Debug, Clone, Copy)]
pub struct PageRank {
    pub iterations: u64,
}

impl Default for PageRank {
    fn default() -> Self {
        Self { iterations: 30 }
    }
}

impl VertexCompute<DoubleGraph> for PageRank {
    fn compute(&self, ctx: &mut Ctx<'_>, messages: &[f64]) -> Outcome {
        if ctx.superstep() >= 1 {
            let incoming: f64 = messages.iter().sum();
            let rank = (0.15f32 / ctx.num_vertices() as f32) as f64 + (0.85f32 as f64) * incoming;
            ctx.set_value(rank);
            ctx.aggregate("max", rank)?;
            ctx.aggregate("min", rank)?;
            ctx.aggregate("sum", 1i64)?;
        }

        if ctx.superstep() < self.iterations {
            let out_degree = ctx.edges().len();
            if out_degree > 0 {
                let share = *ctx.value() / out_degree as f64;
                ctx.send_to_all_edges(share);
            }
        } else {
            ctx.vote_to_halt();
        }
        Ok(())
    }

    fn register_aggregators(&self, registry: &mut AggregatorRegistry) -> Result<()> {
        registry.register("max", DoubleMax)?;
        registry.register("min", DoubleMin)?;
        registry.register("sum", LongSum)
    }
}

/// Stores the current superstep in the vertex value; halts after `last`.
#[derive(Debug, Clone, Copy)]
pub struct SuperstepCounter {
    pub last: u64,
}

impl Default for SuperstepCounter {
    fn default() -> Self {
        Self { last: 3 }
    }
}

impl VertexCompute<DoubleGraph> for SuperstepCounter {
    fn compute(&self, ctx: &mut Ctx<'_>, _messages: &[f64]) -> Outcome {
        ctx.set_value(ctx.superstep() as f64);
        if ctx.superstep() > self.last {
            ctx.vote_to_halt();
        }
        Ok(())
    }
}

/// Two-superstep message exercise.
///
/// Superstep 0: send `id + 1` along every out-edge and to vertex 0.
/// Superstep 1: keep the sum of what arrived and halt.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSum;

impl VertexCompute<DoubleGraph> for MessageSum {
    fn compute(&self, ctx: &mut Ctx<'_>, messages: &[f64]) -> Outcome {
        if ctx.superstep() == 0 {
            let payload = (*ctx.id() + 1) as f64;
            ctx.send_to_all_edges(payload);
            ctx.send(0, payload);
        } else {
            ctx.set_value(messages.iter().sum());
            ctx.vote_to_halt();
        }
        Ok(())
    }
}

/// Fails every vertex at `superstep`; used to test job failure.
#[derive(Debug, Clone, Copy)]
pub struct FailingCompute {
    pub superstep: u64,
}

impl Default for FailingCompute {
    fn default() -> Self {
        Self { superstep: 1 }
    }
}

impl VertexCompute<DoubleGraph> for FailingCompute {
    fn compute(&self, ctx: &mut Ctx<'_>, _messages: &[f64]) -> Outcome {
        if ctx.superstep() == self.superstep {
            return Err(ComputeError::new(format!(
                "vertex {} fails at superstep {}",
                ctx.id(),
                self.superstep
            )));
        }
        ctx.set_value(ctx.superstep() as f64);
        Ok(())
    }
}

/// Distance used for vertices the source cannot reach.
pub const UNREACHED: f64 = f64::MAX;

/// Single-source shortest paths over edge weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestPaths {
    pub source: u64,
}

impl VertexCompute<DoubleGraph> for ShortestPaths {
    fn compute(&self, ctx: &mut Ctx<'_>, messages: &[f64]) -> Outcome {
        if ctx.superstep() == 0 {
            ctx.set_value(UNREACHED);
        }

        let offered = if *ctx.id() == self.source { 0.0 } else { UNREACHED };
        let best = messages.iter().copied().fold(offered, f64::min);
        if best < *ctx.value() {
            ctx.set_value(best);
            let outgoing: Vec<(u64, f64)> = ctx
                .edges()
                .iter()
                .map(|edge| (edge.target, best + edge.value as f64))
                .collect();
            for (target, distance) in outgoing {
                ctx.send(target, distance);
            }
        }
        ctx.vote_to_halt();
        Ok(())
    }
}
