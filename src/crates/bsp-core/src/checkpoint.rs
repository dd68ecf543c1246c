//! Partition snapshots and the store client workers write them through.
//!
//! A snapshot for superstep `N` is the state a partition needs to start `N`
//! again: its vertex records, the inbox already routed to it for `N`, and
//! the aggregated values and graph totals visible during `N`.

use crate::aggregator::AggregatedValues;
use crate::context::GraphTotals;
use crate::error::Result;
use crate::types::{GraphTypes, Message, PartitionId, Superstep, VertexRecord};
use bsp_checkpoint::{CheckpointCodec, CheckpointKey, CheckpointStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialized form of one partition at the start of a superstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSnapshot<I, V, E, M> {
    pub partition: PartitionId,
    pub superstep: Superstep,
    pub vertices: Vec<VertexRecord<I, V, E>>,
    pub inbox: Vec<Message<I, M>>,
    pub aggregated: AggregatedValues,
    pub totals: GraphTotals,
}

/// Snapshot type for a graph type.
pub type Snapshot<G> = PartitionSnapshot<
    <G as GraphTypes>::Id,
    <G as GraphTypes>::Value,
    <G as GraphTypes>::Edge,
    <G as GraphTypes>::Message,
>;

/// Encodes snapshots and talks to the durable store for one job.
#[derive(Clone)]
pub struct CheckpointManager {
    job_id: String,
    codec: CheckpointCodec,
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(job_id: impl Into<String>, codec: CheckpointCodec, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            job_id: job_id.into(),
            codec,
            store,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn key(&self, superstep: Superstep, partition: PartitionId) -> CheckpointKey {
        CheckpointKey::new(self.job_id.clone(), superstep, partition.0)
    }

    pub async fn save<G: GraphTypes>(&self, snapshot: &Snapshot<G>) -> Result<usize> {
        let key = self.key(snapshot.superstep, snapshot.partition);
        let blob = self.codec.encode(snapshot)?;
        let metadata = self.store.save(&key, blob).await?;
        tracing::debug!(
            key = %key,
            vertices = snapshot.vertices.len(),
            inbox = snapshot.inbox.len(),
            bytes = metadata.size_bytes,
            codec = self.codec.name(),
            "Partition checkpoint saved"
        );
        Ok(metadata.size_bytes)
    }

    pub async fn load<G: GraphTypes>(&self, superstep: Superstep, partition: PartitionId) -> Result<Snapshot<G>> {
        let stored = self.store.load(&self.key(superstep, partition)).await?;
        Ok(self.codec.decode(&stored.blob)?)
    }

    /// Drop every partition's snapshot for an incomplete superstep.
    pub async fn discard(&self, superstep: Superstep) -> Result<usize> {
        let removed = self.store.discard_superstep(&self.job_id, superstep).await?;
        tracing::debug!(job = %self.job_id, superstep, removed, "Checkpoint discarded");
        Ok(removed)
    }

    /// Remove everything stored for this job.
    pub async fn delete_all(&self) -> Result<()> {
        self.store.delete_job(&self.job_id).await?;
        tracing::debug!(job = %self.job_id, "Checkpoints deleted");
        Ok(())
    }
}
