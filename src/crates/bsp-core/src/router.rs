//! Message routing between partitions.
//!
//! Two pieces:
//!
//! - [`MessageRouter`] is the outbox a worker fills while computing superstep
//!   `S`. Messages are grouped by destination partition and, when a combiner
//!   is configured, folded per destination vertex before they leave.
//! - [`MessageExchange`] is the shared mailbox between workers. Batches are
//!   keyed by `(superstep, partition)`: everything sent during `S` is
//!   deposited under `S + 1`, and a partition running `S` only takes the
//!   `S` key. A message therefore can never be seen in the superstep that
//!   produced it.
//!
//! The exchange also carries freshly loaded vertices from the worker that
//! read them to the worker that owns them. Every key includes the
//! [`Generation`], so a straggler from before a rollback cannot leak
//! messages or vertices into the replay.

use crate::partitioner::Partitioner;
use crate::plugin::Combiner;
use crate::types::{Envelope, GraphTypes, Message, PartitionId, Superstep, Vertex};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::AddAssign;
use std::sync::Arc;

/// Message counters for one partition, worker or job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStats {
    /// Messages produced by compute calls
    pub sent: u64,
    /// Messages handed to the exchange after combining
    pub transmitted: u64,
    /// Messages addressed to vertices that do not exist
    pub dropped: u64,
}

impl RoutingStats {
    /// Messages saved by the combiner.
    pub fn combined(&self) -> u64 {
        self.sent.saturating_sub(self.transmitted)
    }
}

impl AddAssign for RoutingStats {
    fn add_assign(&mut self, other: Self) {
        self.sent += other.sent;
        self.transmitted += other.transmitted;
        self.dropped += other.dropped;
    }
}

enum Outbound<G: GraphTypes> {
    Plain(Vec<Envelope<G>>),
    Combined(HashMap<G::Id, G::Message>),
}

/// Per-superstep outbox of one worker.
pub struct MessageRouter<G: GraphTypes> {
    num_partitions: u32,
    partitioner: Arc<dyn Partitioner<G::Id>>,
    combiner: Option<Arc<dyn Combiner<G>>>,
    buffers: BTreeMap<PartitionId, Outbound<G>>,
    sent: u64,
}

impl<G: GraphTypes> MessageRouter<G> {
    pub fn new(
        num_partitions: u32,
        partitioner: Arc<dyn Partitioner<G::Id>>,
        combiner: Option<Arc<dyn Combiner<G>>>,
    ) -> Self {
        Self {
            num_partitions,
            partitioner,
            combiner,
            buffers: BTreeMap::new(),
            sent: 0,
        }
    }

    /// Messages routed so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn route(&mut self, target: G::Id, payload: G::Message) {
        self.sent += 1;
        let partition = self.partitioner.partition_of(&target, self.num_partitions);
        let combining = self.combiner.is_some();
        let buffer = self.buffers.entry(partition).or_insert_with(|| {
            if combining {
                Outbound::Combined(HashMap::new())
            } else {
                Outbound::Plain(Vec::new())
            }
        });

        match buffer {
            Outbound::Combined(pending) => {
                let merged = match (pending.remove(&target), &self.combiner) {
                    (Some(previous), Some(combiner)) => combiner.combine(previous, payload),
                    _ => payload,
                };
                pending.insert(target, merged);
            }
            Outbound::Plain(pending) => pending.push(Message::new(target, payload)),
        }
    }

    /// Drain the outbox into per-partition batches, ascending by partition.
    pub fn flush(&mut self) -> (Vec<(PartitionId, Vec<Envelope<G>>)>, RoutingStats) {
        let mut batches = Vec::with_capacity(self.buffers.len());
        let mut transmitted = 0u64;
        for (partition, buffer) in std::mem::take(&mut self.buffers) {
            let batch: Vec<Envelope<G>> = match buffer {
                Outbound::Plain(messages) => messages,
                Outbound::Combined(pending) => pending
                    .into_iter()
                    .map(|(target, payload)| Message::new(target, payload))
                    .collect(),
            };
            transmitted += batch.len() as u64;
            batches.push((partition, batch));
        }
        let stats = RoutingStats {
            sent: std::mem::take(&mut self.sent),
            transmitted,
            dropped: 0,
        };
        (batches, stats)
    }
}

/// Incremented on every reload or rollback. Traffic from an older
/// generation is never delivered.
pub type Generation = u64;

/// Shared mailbox between workers.
pub struct MessageExchange<G: GraphTypes> {
    inboxes: Mutex<HashMap<(Generation, Superstep, PartitionId), Vec<Envelope<G>>>>,
    loaded: Mutex<HashMap<(Generation, PartitionId), Vec<(usize, Vertex<G>)>>>,
}

impl<G: GraphTypes> Default for MessageExchange<G> {
    fn default() -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashMap::new()),
        }
    }
}

impl<G: GraphTypes> MessageExchange<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a batch to `partition` for `superstep`.
    pub fn deposit(
        &self,
        generation: Generation,
        superstep: Superstep,
        partition: PartitionId,
        batch: Vec<Envelope<G>>,
    ) {
        if batch.is_empty() {
            return;
        }
        self.inboxes
            .lock()
            .entry((generation, superstep, partition))
            .or_default()
            .extend(batch);
    }

    /// Remove and return the inbox of `partition` for `superstep`.
    pub fn take(
        &self,
        generation: Generation,
        superstep: Superstep,
        partition: PartitionId,
    ) -> Vec<Envelope<G>> {
        self.inboxes
            .lock()
            .remove(&(generation, superstep, partition))
            .unwrap_or_default()
    }

    /// Copy of the inbox without consuming it.
    pub fn peek(
        &self,
        generation: Generation,
        superstep: Superstep,
        partition: PartitionId,
    ) -> Vec<Envelope<G>> {
        self.inboxes
            .lock()
            .get(&(generation, superstep, partition))
            .cloned()
            .unwrap_or_default()
    }

    /// Messages waiting across all keys.
    pub fn pending(&self) -> usize {
        self.inboxes.lock().values().map(Vec::len).sum()
    }

    /// Ship loaded vertices (tagged with their split) to their owner.
    pub fn ship_vertices(
        &self,
        generation: Generation,
        partition: PartitionId,
        vertices: Vec<(usize, Vertex<G>)>,
    ) {
        if vertices.is_empty() {
            return;
        }
        self.loaded
            .lock()
            .entry((generation, partition))
            .or_default()
            .extend(vertices);
    }

    pub fn take_vertices(
        &self,
        generation: Generation,
        partition: PartitionId,
    ) -> Vec<(usize, Vertex<G>)> {
        self.loaded
            .lock()
            .remove(&(generation, partition))
            .unwrap_or_default()
    }

    /// Drop everything not belonging to `generation`.
    pub fn retain_generation(&self, generation: Generation) {
        self.inboxes.lock().retain(|(g, _, _), _| *g == generation);
        self.loaded.lock().retain(|(g, _), _| *g == generation);
    }

    /// Drop everything in flight.
    pub fn clear(&self) {
        self.inboxes.lock().clear();
        self.loaded.lock().clear();
    }
}
