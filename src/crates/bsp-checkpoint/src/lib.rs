//! # bsp-checkpoint - Durable snapshots for BSP partitions
//!
//! The engine treats checkpoint storage as an opaque, durable `key → blob`
//! map keyed by `(job, superstep, partition)`. This crate holds that contract
//! and two backends:
//!
//! - [`InMemoryCheckpointStore`] - shared map for tests and single-process runs
//! - [`FileCheckpointStore`] - one file pair per key, atomic rename on write
//!
//! [`CheckpointCodec`] turns engine snapshots into blobs (JSON or bincode).
//! Every stored blob carries a blake3 digest in its [`CheckpointMetadata`];
//! a blob that fails verification loads as [`CheckpointError::Invalid`].
//!
//! ```rust
//! use bsp_checkpoint::{CheckpointKey, CheckpointStore, InMemoryCheckpointStore};
//!
//! # #[tokio::main]
//! # async fn main() -> bsp_checkpoint::Result<()> {
//! let store = InMemoryCheckpointStore::new();
//! let key = CheckpointKey::new("pagerank", 4, 0);
//! store.save(&key, vec![0xAB]).await?;
//! assert_eq!(store.latest_superstep("pagerank", 0).await?, Some(4));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod file;
pub mod key;
pub mod memory;
pub mod traits;

pub use codec::CheckpointCodec;
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use key::CheckpointKey;
pub use memory::InMemoryCheckpointStore;
pub use traits::{CheckpointMetadata, CheckpointStore, StoredCheckpoint};
