//! Core BSP data types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Global superstep counter. Starts at 0, advanced only by the coordinator.
pub type Superstep = u64;

/// Bounds every vertex identifier satisfies: totally ordered, hashable,
/// serializable so it can travel in messages and checkpoints.
pub trait VertexId:
    Clone + Eq + Ord + Hash + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> VertexId for T where
    T: Clone + Eq + Ord + Hash + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Bounds for opaque payloads (vertex values, edge values, messages).
pub trait Payload: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{}

/// The four types a job is polymorphic over.
///
/// ```rust
/// use bsp_core::GraphTypes;
///
/// struct Weighted;
///
/// impl GraphTypes for Weighted {
///     type Id = u64;
///     type Value = f64;
///     type Edge = f32;
///     type Message = f64;
/// }
/// ```
pub trait GraphTypes: Send + Sync + 'static {
    type Id: VertexId;
    type Value: Payload;
    type Edge: Payload;
    type Message: Payload;
}

/// Index of a partition within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identifier of a (simulated) worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Outgoing edge: target vertex plus edge value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<I, E> {
    pub target: I,
    pub value: E,
}

impl<I, E> Edge<I, E> {
    pub fn new(target: I, value: E) -> Self {
        Self { target, value }
    }
}

/// A vertex as owned by its partition.
///
/// `halted` is the vote-to-halt flag. A halted vertex is skipped until a
/// message arrives for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexRecord<I, V, E> {
    pub id: I,
    pub value: V,
    pub edges: Vec<Edge<I, E>>,
    pub halted: bool,
}

impl<I, V, E> VertexRecord<I, V, E> {
    /// A new, active vertex without edges.
    pub fn new(id: I, value: V) -> Self {
        Self {
            id,
            value,
            edges: Vec::new(),
            halted: false,
        }
    }

    /// Builder-style edge addition.
    pub fn with_edge(mut self, target: I, value: E) -> Self {
        self.edges.push(Edge::new(target, value));
        self
    }

    pub fn is_active(&self) -> bool {
        !self.halted
    }
}

/// A message in flight: destination vertex and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<I, M> {
    pub target: I,
    pub payload: M,
}

impl<I, M> Message<I, M> {
    pub fn new(target: I, payload: M) -> Self {
        Self { target, payload }
    }
}

/// Vertex record for a graph type.
pub type Vertex<G> = VertexRecord<
    <G as GraphTypes>::Id,
    <G as GraphTypes>::Value,
    <G as GraphTypes>::Edge,
>;

/// Message for a graph type.
pub type Envelope<G> = Message<<G as GraphTypes>::Id, <G as GraphTypes>::Message>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_builder() {
        let v: VertexRecord<u64, f64, f32> = VertexRecord::new(1, 0.5)
            .with_edge(2, 1.0)
            .with_edge(3, 2.0);
        assert!(v.is_active());
        assert_eq!(v.edges.len(), 2);
        assert_eq!(v.edges[1].target, 3);
    }

    #[test]
    fn test_display_ids() {
        assert_eq!(PartitionId(3).to_string(), "p3");
        assert_eq!(WorkerId(0).to_string(), "w0");
    }
}
