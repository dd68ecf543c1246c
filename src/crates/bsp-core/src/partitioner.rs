//! Vertex → partition → worker assignment.
//!
//! [`Partitioner::partition_of`] must be a pure function of the id and the
//! partition count: every worker computes it independently and routing after
//! a recovery must land messages exactly where they went before.
//!
//! [`HashPartitioner`] hashes with `DefaultHasher::new()`, whose keys are
//! fixed, so the mapping is stable across workers and attempts in one build.

use crate::types::{PartitionId, WorkerId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps a vertex id to its owning partition.
pub trait Partitioner<I>: Send + Sync {
    fn partition_of(&self, id: &I, num_partitions: u32) -> PartitionId;
}

/// Hash of the id modulo the partition count.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl<I: Hash> Partitioner<I> for HashPartitioner {
    fn partition_of(&self, id: &I, num_partitions: u32) -> PartitionId {
        if num_partitions <= 1 {
            return PartitionId(0);
        }
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        PartitionId((hasher.finish() % num_partitions as u64) as u32)
    }
}

/// Static assignment of partitions to workers: partition `p` belongs to
/// worker `p % workers` for the lifetime of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    workers: u32,
    num_partitions: u32,
}

impl PartitionLayout {
    pub fn new(workers: u32, partitions_per_worker: u32) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            num_partitions: workers * partitions_per_worker.max(1),
        }
    }

    pub fn workers(&self) -> u32 {
        self.workers
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn owner(&self, partition: PartitionId) -> WorkerId {
        WorkerId(partition.0 % self.workers)
    }

    /// Partitions owned by `worker`, ascending.
    pub fn partitions_of(&self, worker: WorkerId) -> Vec<PartitionId> {
        (worker.0..self.num_partitions)
            .step_by(self.workers as usize)
            .map(PartitionId)
            .collect()
    }

    pub fn all_partitions(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.num_partitions).map(PartitionId)
    }

    pub fn all_workers(&self) -> impl Iterator<Item = WorkerId> {
        (0..self.workers).map(WorkerId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_partition() {
        assert_eq!(HashPartitioner.partition_of(&42u64, 1), PartitionId(0));
        assert_eq!(HashPartitioner.partition_of(&42u64, 0), PartitionId(0));
    }

    #[test]
    fn test_distribution_covers_partitions() {
        let mut counts = [0usize; 4];
        for id in 0u64..1000 {
            counts[HashPartitioner.partition_of(&id, 4).0 as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 150), "skewed: {:?}", counts);
    }

    #[test]
    fn test_layout_round_robin() {
        let layout = PartitionLayout::new(2, 3);
        assert_eq!(layout.num_partitions(), 6);
        assert_eq!(
            layout.partitions_of(WorkerId(0)),
            vec![PartitionId(0), PartitionId(2), PartitionId(4)]
        );
        assert_eq!(
            layout.partitions_of(WorkerId(1)),
            vec![PartitionId(1), PartitionId(3), PartitionId(5)]
        );
        assert_eq!(layout.owner(PartitionId(5)), WorkerId(1));
    }

    proptest! {
        #[test]
        fn prop_partition_is_deterministic_and_in_range(id in any::<u64>(), n in 1u32..64) {
            let first = HashPartitioner.partition_of(&id, n);
            let second = HashPartitioner.partition_of(&id, n);
            prop_assert_eq!(first, second);
            prop_assert!(first.0 < n);
        }

        #[test]
        fn prop_every_partition_has_exactly_one_owner(workers in 1u32..8, per_worker in 1u32..5) {
            let layout = PartitionLayout::new(workers, per_worker);
            let mut owned: Vec<PartitionId> = layout
                .all_workers()
                .flat_map(|w| layout.partitions_of(w))
                .collect();
            owned.sort();
            let all: Vec<PartitionId> = layout.all_partitions().collect();
            prop_assert_eq!(owned, all);
        }
    }
}
