//! One partition's vertices and its per-superstep state machine.
//!
//! ```text
//! AwaitingMessages ──inbox──▶ Computing ──tallies──▶ Reported
//!        ▲                                              │
//!        └──────────── next RunSuperstep ───────────────┘
//! ```
//!
//! During `Computing` every vertex that is active, or halted but addressed
//! by at least one message, gets exactly one compute call. Messages for ids
//! the partition does not own are dropped and counted.

use crate::aggregator::{AggregatorRegistry, PartialAggregates};
use crate::context::{ComputeContext, SuperstepContext};
use crate::error::{BspError, Result};
use crate::plugin::VertexCompute;
use crate::router::MessageRouter;
use crate::types::{Envelope, GraphTypes, PartitionId, Superstep, Vertex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a partition is within the current superstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionPhase {
    AwaitingMessages,
    Computing,
    Reported,
}

/// Tallies a partition sends to the coordinator after a superstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub partition: PartitionId,
    pub superstep: Superstep,
    /// Vertices left active after this superstep
    pub active_vertices: u64,
    /// Messages produced by this partition's compute calls
    pub messages_sent: u64,
    /// Vertices that were computed this superstep
    pub computed_vertices: u64,
    /// Inbound messages addressed to vertices this partition does not own
    pub dropped_messages: u64,
    pub aggregates: PartialAggregates,
}

/// The vertices owned by one partition.
pub struct PartitionState<G: GraphTypes> {
    id: PartitionId,
    vertices: BTreeMap<G::Id, Vertex<G>>,
    phase: PartitionPhase,
}

impl<G: GraphTypes> PartitionState<G> {
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            vertices: BTreeMap::new(),
            phase: PartitionPhase::AwaitingMessages,
        }
    }

    /// Build a partition from loaded vertices tagged with their input split.
    ///
    /// A vertex id seen twice is an input error naming the later split.
    pub fn assemble(id: PartitionId, loaded: Vec<(usize, Vertex<G>)>) -> Result<Self> {
        let mut state = Self::new(id);
        for (split, mut vertex) in loaded {
            if state.vertices.contains_key(&vertex.id) {
                return Err(BspError::input_split(
                    split,
                    format!("duplicate vertex id {:?}", vertex.id),
                ));
            }
            vertex.halted = false;
            state.vertices.insert(vertex.id.clone(), vertex);
        }
        Ok(state)
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn phase(&self) -> PartitionPhase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn num_edges(&self) -> u64 {
        self.vertices.values().map(|v| v.edges.len() as u64).sum()
    }

    pub fn active_vertices(&self) -> u64 {
        self.vertices.values().filter(|v| v.is_active()).count() as u64
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex<G>> {
        self.vertices.values()
    }

    pub fn get(&self, id: &G::Id) -> Option<&Vertex<G>> {
        self.vertices.get(id)
    }

    /// Copy of every vertex record, ordered by id.
    pub fn snapshot_vertices(&self) -> Vec<Vertex<G>> {
        self.vertices.values().cloned().collect()
    }

    /// Replace the vertex set with restored records.
    pub fn restore(&mut self, vertices: Vec<Vertex<G>>) {
        self.vertices = vertices.into_iter().map(|v| (v.id.clone(), v)).collect();
        self.phase = PartitionPhase::AwaitingMessages;
    }

    /// Run one superstep over this partition.
    ///
    /// Outgoing messages go to `router`; the returned report carries the
    /// tallies for the barrier. A compute error aborts the partition's
    /// superstep and is returned with its vertex, partition and superstep.
    pub fn compute_superstep(
        &mut self,
        step: &SuperstepContext,
        inbox: Vec<Envelope<G>>,
        compute: &dyn VertexCompute<G>,
        router: &mut MessageRouter<G>,
        registry: &AggregatorRegistry,
    ) -> Result<PartitionReport> {
        self.phase = PartitionPhase::AwaitingMessages;

        let mut grouped: BTreeMap<G::Id, Vec<G::Message>> = BTreeMap::new();
        let mut dropped = 0u64;
        for message in inbox {
            if self.vertices.contains_key(&message.target) {
                grouped.entry(message.target).or_default().push(message.payload);
            } else {
                dropped += 1;
                tracing::warn!(
                    partition = %self.id,
                    superstep = step.superstep,
                    target = ?message.target,
                    "Dropping message for nonexistent vertex"
                );
            }
        }

        self.phase = PartitionPhase::Computing;
        let sent_before = router.sent();
        let mut partial = registry.partial();
        let mut computed = 0u64;
        let no_messages: Vec<G::Message> = Vec::new();

        for (id, vertex) in self.vertices.iter_mut() {
            let messages = grouped.remove(id);
            if vertex.halted && messages.is_none() {
                continue;
            }
            vertex.halted = false;
            computed += 1;

            let messages = messages.as_deref().unwrap_or(&no_messages);
            let mut ctx = ComputeContext::new(step, vertex, router, registry, &mut partial);
            compute.compute(&mut ctx, messages).map_err(|error| BspError::Compute {
                partition: self.id,
                superstep: step.superstep,
                vertex: format!("{:?}", id),
                error,
            })?;
        }

        let report = PartitionReport {
            partition: self.id,
            superstep: step.superstep,
            active_vertices: self.active_vertices(),
            messages_sent: router.sent() - sent_before,
            computed_vertices: computed,
            dropped_messages: dropped,
            aggregates: partial,
        };
        self.phase = PartitionPhase::Reported;

        tracing::debug!(
            partition = %self.id,
            superstep = step.superstep,
            computed = report.computed_vertices,
            active = report.active_vertices,
            sent = report.messages_sent,
            "Partition superstep done"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregatedValues, LongSum};
    use crate::context::GraphTotals;
    use crate::error::ComputeError;
    use crate::partitioner::HashPartitioner;
    use crate::types::{Message, VertexRecord};
    use std::sync::Arc;

    struct Ints;

    impl GraphTypes for Ints {
        type Id = u64;
        type Value = i64;
        type Edge = ();
        type Message = i64;
    }

    /// Adds incoming messages to the value, forwards once, then halts.
    struct Accumulate;

    impl VertexCompute<Ints> for Accumulate {
        fn compute(
            &self,
            ctx: &mut ComputeContext<'_, Ints>,
            messages: &[i64],
        ) -> std::result::Result<(), ComputeError> {
            let sum: i64 = messages.iter().sum();
            let value = *ctx.value() + sum;
            ctx.set_value(value);
            ctx.aggregate("computed", 1i64)?;
            if ctx.superstep() == 0 {
                ctx.send_to_all_edges(1);
            }
            ctx.vote_to_halt();
            Ok(())
        }
    }

    struct Explode;

    impl VertexCompute<Ints> for Explode {
        fn compute(
            &self,
            _ctx: &mut ComputeContext<'_, Ints>,
            _messages: &[i64],
        ) -> std::result::Result<(), ComputeError> {
            Err(ComputeError::new("boom"))
        }
    }

    fn registry() -> AggregatorRegistry {
        let mut registry = AggregatorRegistry::new();
        registry.register("computed", LongSum).unwrap();
        registry
    }

    fn step(superstep: u64) -> SuperstepContext {
        SuperstepContext::new(superstep, GraphTotals::default(), Arc::new(AggregatedValues::default()))
    }

    fn partition() -> PartitionState<Ints> {
        PartitionState::assemble(
            PartitionId(0),
            vec![
                (0, VertexRecord::new(1, 0).with_edge(2, ())),
                (0, VertexRecord::new(2, 0).with_edge(1, ())),
                (1, VertexRecord::new(3, 0)),
            ],
        )
        .unwrap()
    }

    fn router() -> MessageRouter<Ints> {
        MessageRouter::new(1, Arc::new(HashPartitioner), None)
    }

    #[test]
    fn test_assemble_rejects_duplicates() {
        let err = PartitionState::<Ints>::assemble(
            PartitionId(0),
            vec![(0, VertexRecord::new(1, 0)), (3, VertexRecord::new(1, 5))],
        )
        .err()
        .unwrap();
        assert!(matches!(err, BspError::InputSplit { split: 3, .. }));
    }

    #[test]
    fn test_superstep_zero_computes_everyone() {
        let registry = registry();
        let mut partition = partition();
        let mut router = router();

        let report = partition
            .compute_superstep(&step(0), Vec::new(), &Accumulate, &mut router, &registry)
            .unwrap();
        assert_eq!(report.computed_vertices, 3);
        assert_eq!(report.active_vertices, 0);
        assert_eq!(report.messages_sent, 2);
        assert_eq!(partition.phase(), PartitionPhase::Reported);
    }

    #[test]
    fn test_halted_vertices_skipped_unless_messaged() {
        let registry = registry();
        let mut partition = partition();
        let mut router = router();
        partition
            .compute_superstep(&step(0), Vec::new(), &Accumulate, &mut router, &registry)
            .unwrap();

        let inbox = vec![Message::new(2, 5), Message::new(2, 6), Message::new(99, 1)];
        let report = partition
            .compute_superstep(&step(1), inbox, &Accumulate, &mut router, &registry)
            .unwrap();

        assert_eq!(report.computed_vertices, 1);
        assert_eq!(report.dropped_messages, 1);
        assert_eq!(report.messages_sent, 0);
        assert_eq!(partition.get(&2).unwrap().value, 11);
        assert_eq!(partition.get(&1).unwrap().value, 0);
        assert_eq!(
            report.aggregates.iter().collect::<Vec<_>>(),
            vec![("computed", crate::aggregator::AggregateValue::Long(1))]
        );
    }

    #[test]
    fn test_compute_error_names_vertex() {
        let registry = registry();
        let mut partition = partition();
        let err = partition
            .compute_superstep(&step(2), Vec::new(), &Explode, &mut router(), &registry)
            .unwrap_err();
        match err {
            BspError::Compute {
                partition,
                superstep,
                vertex,
                ..
            } => {
                assert_eq!(partition, PartitionId(0));
                assert_eq!(superstep, 2);
                assert_eq!(vertex, "1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_restore_replaces_vertices() {
        let mut partition = partition();
        let saved = partition.snapshot_vertices();
        partition.restore(vec![VertexRecord::new(7, 1)]);
        assert_eq!(partition.len(), 1);
        partition.restore(saved);
        assert_eq!(partition.len(), 3);
        assert_eq!(partition.num_edges(), 2);
    }
}
