//! The storage contract the engine writes partition snapshots through.
//!
//! A [`CheckpointStore`] is an opaque, durable `key → blob` map. The engine
//! never asks a store to interpret a blob; it only needs:
//!
//! - `save`: write-once-per-key from the engine's point of view. Re-saving the
//!   same key after a rollback replaces the old blob (snapshots are
//!   deterministic, so this is idempotent).
//! - `load`: `NotFound` when nothing is stored, `Invalid` when the stored blob
//!   fails its digest check.
//! - `supersteps`: which supersteps a partition has snapshots for, used to
//!   pick a recovery point.
//! - `discard_superstep`: drops every partition's blob for a superstep whose
//!   checkpoint never completed.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use bsp_checkpoint::{CheckpointKey, CheckpointMetadata, CheckpointStore, StoredCheckpoint, Result};
//!
//! struct ObjectStoreBackend { /* client */ }
//!
//! #[async_trait]
//! impl CheckpointStore for ObjectStoreBackend {
//!     async fn save(&self, key: &CheckpointKey, blob: Vec<u8>) -> Result<CheckpointMetadata> {
//!         let metadata = CheckpointMetadata::for_blob(&blob);
//!         // PUT key.relative_path() with blob and metadata
//!         Ok(metadata)
//!     }
//!     // ...
//! }
//! ```

use crate::error::Result;
use crate::key::CheckpointKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping stored next to every blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// When the blob was written
    pub created_at: DateTime<Utc>,
    /// Blob length in bytes
    pub size_bytes: usize,
    /// Hex blake3 digest of the blob
    pub digest: String,
}

impl CheckpointMetadata {
    /// Describe a blob that is about to be written.
    pub fn for_blob(blob: &[u8]) -> Self {
        Self {
            created_at: Utc::now(),
            size_bytes: blob.len(),
            digest: blake3::hash(blob).to_hex().to_string(),
        }
    }

    /// Check a loaded blob against this metadata.
    pub fn verify(&self, blob: &[u8]) -> bool {
        self.size_bytes == blob.len() && blake3::hash(blob).to_hex().as_str() == self.digest
    }
}

/// A blob together with its key and metadata.
#[derive(Debug, Clone)]
pub struct StoredCheckpoint {
    pub key: CheckpointKey,
    pub metadata: CheckpointMetadata,
    pub blob: Vec<u8>,
}

/// Durable key→blob store for partition snapshots.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store `blob` under `key`, replacing anything already there.
    async fn save(&self, key: &CheckpointKey, blob: Vec<u8>) -> Result<CheckpointMetadata>;

    /// Fetch the blob stored under `key`.
    async fn load(&self, key: &CheckpointKey) -> Result<StoredCheckpoint>;

    /// Supersteps with a stored snapshot for `partition`, ascending.
    async fn supersteps(&self, job_id: &str, partition: u32) -> Result<Vec<u64>>;

    /// Remove every partition's snapshot for `superstep`. Returns how many were removed.
    async fn discard_superstep(&self, job_id: &str, superstep: u64) -> Result<usize>;

    /// Remove everything stored for a job.
    async fn delete_job(&self, job_id: &str) -> Result<()>;

    /// Newest superstep with a stored snapshot for `partition`.
    async fn latest_superstep(&self, job_id: &str, partition: u32) -> Result<Option<u64>> {
        Ok(self.supersteps(job_id, partition).await?.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_verifies_matching_blob() {
        let blob = b"partition state".to_vec();
        let metadata = CheckpointMetadata::for_blob(&blob);
        assert_eq!(metadata.size_bytes, blob.len());
        assert!(metadata.verify(&blob));
    }

    #[test]
    fn test_metadata_rejects_torn_blob() {
        let blob = b"partition state".to_vec();
        let metadata = CheckpointMetadata::for_blob(&blob);
        assert!(!metadata.verify(&blob[..4]));
        assert!(!metadata.verify(b"partition STATE"));
    }
}
