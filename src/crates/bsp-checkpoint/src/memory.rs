//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps every blob in an `Arc<RwLock<BTreeMap>>`.
//! Clones share the same map, so a test can hand one clone to the engine and
//! keep another to inspect what was written. Nothing survives the process.
//!
//! For failure-path tests the store can be told to reject writes for chosen
//! partitions ([`fail_writes_for`](InMemoryCheckpointStore::fail_writes_for)),
//! which exercises the "checkpoint write failed, recovery point degrades" path
//! without a real disk.

use crate::{
    error::{CheckpointError, Result},
    key::CheckpointKey,
    traits::{CheckpointMetadata, CheckpointStore, StoredCheckpoint},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    metadata: CheckpointMetadata,
    blob: Vec<u8>,
}

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    entries: Arc<RwLock<BTreeMap<CheckpointKey, Entry>>>,
    failing_partitions: Arc<RwLock<HashSet<u32>>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs across all jobs
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All stored keys, oldest superstep first
    pub async fn keys(&self) -> Vec<CheckpointKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Make every subsequent `save` for `partition` fail with a storage error.
    pub async fn fail_writes_for(&self, partition: u32) {
        self.failing_partitions.write().await.insert(partition);
    }

    /// Undo [`fail_writes_for`](Self::fail_writes_for) for all partitions.
    pub async fn heal(&self) {
        self.failing_partitions.write().await.clear();
    }

    /// Drop everything (useful between tests)
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, key: &CheckpointKey, blob: Vec<u8>) -> Result<CheckpointMetadata> {
        if self.failing_partitions.read().await.contains(&key.partition) {
            return Err(CheckpointError::Storage(format!(
                "write rejected for {}",
                key
            )));
        }
        let metadata = CheckpointMetadata::for_blob(&blob);
        self.entries.write().await.insert(
            key.clone(),
            Entry {
                metadata: metadata.clone(),
                blob,
            },
        );
        Ok(metadata)
    }

    async fn load(&self, key: &CheckpointKey) -> Result<StoredCheckpoint> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(key)
            .ok_or_else(|| CheckpointError::NotFound(key.to_string()))?;
        Ok(StoredCheckpoint {
            key: key.clone(),
            metadata: entry.metadata.clone(),
            blob: entry.blob.clone(),
        })
    }

    async fn supersteps(&self, job_id: &str, partition: u32) -> Result<Vec<u64>> {
        let entries = self.entries.read().await;
        Ok(entries
            .keys()
            .filter(|k| k.job_id == job_id && k.partition == partition)
            .map(|k| k.superstep)
            .collect())
    }

    async fn discard_superstep(&self, job_id: &str, superstep: u64) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !(k.job_id == job_id && k.superstep == superstep));
        Ok(before - entries.len())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.entries.write().await.retain(|k, _| k.job_id != job_id);
        Ok(())
    }
}
