use crate::DoubleGraph;
use bsp_core::Combiner;

/// Adds messages for the same vertex.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumCombiner;

impl Combiner<DoubleGraph> for SumCombiner {
    fn combine(&self, a: f64, b: f64) -> f64 {
        a + b
    }
}

/// Keeps the smaller message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinCombiner;

impl Combiner<DoubleGraph> for MinCombiner {
    fn combine(&self, a: f64, b: f64) -> f64 {
        a.min(b)
    }
}
