//! Filesystem-backed checkpoint store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<job_id>/superstep-0000000004/partition-00002.ckpt
//! <root>/<job_id>/superstep-0000000004/partition-00002.meta.json
//! ```
//!
//! The blob is written to a temporary file and renamed into place, then the
//! metadata file is written the same way. A snapshot only counts as present
//! once its metadata exists, so a writer that dies mid-save leaves nothing
//! visible to `supersteps`.

use crate::{
    error::{CheckpointError, Result},
    key::CheckpointKey,
    traits::{CheckpointMetadata, CheckpointStore, StoredCheckpoint},
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

const BLOB_EXT: &str = "ckpt";
const META_SUFFIX: &str = "meta.json";

/// Checkpoint store writing one file pair per key below `root`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn superstep_dir(&self, job_id: &str, superstep: u64) -> PathBuf {
        self.root
            .join(job_id)
            .join(format!("superstep-{:010}", superstep))
    }

    fn blob_path(&self, key: &CheckpointKey) -> PathBuf {
        self.superstep_dir(&key.job_id, key.superstep)
            .join(format!("partition-{:05}.{}", key.partition, BLOB_EXT))
    }

    fn meta_path(&self, key: &CheckpointKey) -> PathBuf {
        self.superstep_dir(&key.job_id, key.superstep)
            .join(format!("partition-{:05}.{}", key.partition, META_SUFFIX))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn parse_superstep_dir(name: &str) -> Option<u64> {
    name.strip_prefix("superstep-")?.parse().ok()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, key: &CheckpointKey, blob: Vec<u8>) -> Result<CheckpointMetadata> {
        let dir = self.superstep_dir(&key.job_id, key.superstep);
        fs::create_dir_all(&dir).await?;

        let metadata = CheckpointMetadata::for_blob(&blob);
        Self::write_atomic(&self.blob_path(key), &blob).await?;
        let meta_bytes = serde_json::to_vec(&metadata)?;
        Self::write_atomic(&self.meta_path(key), &meta_bytes).await?;

        tracing::debug!(
            key = %key,
            bytes = metadata.size_bytes,
            "Checkpoint written"
        );
        Ok(metadata)
    }

    async fn load(&self, key: &CheckpointKey) -> Result<StoredCheckpoint> {
        let meta_bytes = match fs::read(self.meta_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: CheckpointMetadata = serde_json::from_slice(&meta_bytes)?;
        let blob = fs::read(self.blob_path(key)).await?;

        if !metadata.verify(&blob) {
            return Err(CheckpointError::Invalid(format!(
                "digest mismatch for {}",
                key
            )));
        }

        Ok(StoredCheckpoint {
            key: key.clone(),
            metadata,
            blob,
        })
    }

    async fn supersteps(&self, job_id: &str, partition: u32) -> Result<Vec<u64>> {
        let job_dir = self.root.join(job_id);
        let mut entries = match fs::read_dir(&job_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(superstep) = name.to_str().and_then(parse_superstep_dir) else {
                continue;
            };
            let key = CheckpointKey::new(job_id, superstep, partition);
            if fs::try_exists(self.meta_path(&key)).await? {
                found.push(superstep);
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    async fn discard_superstep(&self, job_id: &str, superstep: u64) -> Result<usize> {
        let dir = self.superstep_dir(job_id, superstep);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry
                .file_name()
                .to_str()
                .map_or(false, |n| n.ends_with(META_SUFFIX))
            {
                removed += 1;
            }
        }
        fs::remove_dir_all(&dir).await?;
        Ok(removed)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.root.join(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let key = CheckpointKey::new("job", 3, 1);

        store.save(&key, b"snapshot".to_vec()).await.unwrap();
        let loaded = store.load(&key).await.unwrap();
        assert_eq!(loaded.blob, b"snapshot");
        assert!(dir
            .path()
            .join("job/superstep-0000000003/partition-00001.ckpt")
            .exists());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let err = store.load(&CheckpointKey::new("job", 0, 0)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.supersteps("job", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let key = CheckpointKey::new("job", 0, 0);
        store.save(&key, b"original".to_vec()).await.unwrap();

        std::fs::write(store.blob_path(&key), b"tampered").unwrap();
        let err = store.load(&key).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_blob_without_metadata_is_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&CheckpointKey::new("job", 2, 0), vec![1]).await.unwrap();

        // A torn write: blob present, metadata never committed.
        let torn = CheckpointKey::new("job", 4, 0);
        std::fs::create_dir_all(store.superstep_dir("job", 4)).unwrap();
        std::fs::write(store.blob_path(&torn), [1, 2]).unwrap();

        assert_eq!(store.supersteps("job", 0).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_discard_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        for superstep in [0, 2] {
            for partition in 0..2 {
                store
                    .save(&CheckpointKey::new("job", superstep, partition), vec![0])
                    .await
                    .unwrap();
            }
        }

        assert_eq!(store.discard_superstep("job", 2).await.unwrap(), 2);
        assert_eq!(store.supersteps("job", 1).await.unwrap(), vec![0]);
        assert_eq!(store.discard_superstep("job", 8).await.unwrap(), 0);

        store.delete_job("job").await.unwrap();
        assert!(store.supersteps("job", 0).await.unwrap().is_empty());
        store.delete_job("job").await.unwrap();
    }
}
