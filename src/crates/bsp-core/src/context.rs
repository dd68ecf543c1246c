//! What a vertex sees during its compute call.

use crate::aggregator::{AggregateValue, AggregatedValues, AggregatorRegistry, PartialAggregates};
use crate::error::ComputeError;
use crate::router::MessageRouter;
use crate::types::{Edge, GraphTypes, Superstep, Vertex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Graph-wide counts computed at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphTotals {
    pub vertices: u64,
    pub edges: u64,
}

/// Read-only state shared by every vertex of one superstep.
#[derive(Debug, Clone)]
pub struct SuperstepContext {
    pub superstep: Superstep,
    pub totals: GraphTotals,
    /// Values merged at the end of the previous superstep
    pub aggregated: Arc<AggregatedValues>,
}

impl SuperstepContext {
    pub fn new(superstep: Superstep, totals: GraphTotals, aggregated: Arc<AggregatedValues>) -> Self {
        Self {
            superstep,
            totals,
            aggregated,
        }
    }
}

/// Handle given to [`VertexCompute::compute`](crate::plugin::VertexCompute::compute).
///
/// Everything a vertex can affect goes through here: its own value and
/// edges, outgoing messages, aggregator contributions and its halt vote.
pub struct ComputeContext<'a, G: GraphTypes> {
    step: &'a SuperstepContext,
    vertex: &'a mut Vertex<G>,
    router: &'a mut MessageRouter<G>,
    registry: &'a AggregatorRegistry,
    partial: &'a mut PartialAggregates,
}

impl<'a, G: GraphTypes> ComputeContext<'a, G> {
    pub(crate) fn new(
        step: &'a SuperstepContext,
        vertex: &'a mut Vertex<G>,
        router: &'a mut MessageRouter<G>,
        registry: &'a AggregatorRegistry,
        partial: &'a mut PartialAggregates,
    ) -> Self {
        Self {
            step,
            vertex,
            router,
            registry,
            partial,
        }
    }

    pub fn superstep(&self) -> Superstep {
        self.step.superstep
    }

    /// Vertices in the whole graph.
    pub fn num_vertices(&self) -> u64 {
        self.step.totals.vertices
    }

    /// Edges in the whole graph.
    pub fn num_edges(&self) -> u64 {
        self.step.totals.edges
    }

    pub fn id(&self) -> &G::Id {
        &self.vertex.id
    }

    pub fn value(&self) -> &G::Value {
        &self.vertex.value
    }

    pub fn set_value(&mut self, value: G::Value) {
        self.vertex.value = value;
    }

    pub fn edges(&self) -> &[Edge<G::Id, G::Edge>] {
        &self.vertex.edges
    }

    pub fn edges_mut(&mut self) -> &mut Vec<Edge<G::Id, G::Edge>> {
        &mut self.vertex.edges
    }

    /// Send `message` to `target`, visible there in the next superstep.
    pub fn send(&mut self, target: G::Id, message: G::Message) {
        self.router.route(target, message);
    }

    pub fn send_to_all_edges(&mut self, message: G::Message) {
        for edge in &self.vertex.edges {
            self.router.route(edge.target.clone(), message.clone());
        }
    }

    /// Contribute to a named aggregator for this superstep.
    pub fn aggregate(
        &mut self,
        name: &str,
        value: impl Into<AggregateValue>,
    ) -> Result<(), ComputeError> {
        self.partial
            .contribute(self.registry, name, value.into())
            .map_err(|e| ComputeError::new(e.to_string()))
    }

    /// Value of an aggregator as merged at the end of the previous superstep.
    pub fn aggregated(&self, name: &str) -> Option<AggregateValue> {
        self.step.aggregated.get(name)
    }

    /// Deactivate until a message arrives.
    pub fn vote_to_halt(&mut self) {
        self.vertex.halted = true;
    }
}
