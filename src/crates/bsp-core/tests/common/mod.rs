//! Small graph programs and plug-ins shared by the engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bsp_checkpoint::{
    CheckpointError, CheckpointKey, CheckpointMetadata, CheckpointStore, InMemoryCheckpointStore,
    StoredCheckpoint,
};
use bsp_core::{
    BspJob, Combiner, ComputeContext, ComputeError, GraphTypes, InputSplit, JobConfig, JobPlugins,
    Result, VertexCompute, VertexInputReader, VertexOutputWriter, VertexRecord, VertexStream,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct Ints;

impl GraphTypes for Ints {
    type Id = u64;
    type Value = i64;
    type Edge = ();
    type Message = i64;
}

/// Ring `0 → 1 → … → n-1 → 0`, optionally with a duplicated id.
pub struct RingReader {
    pub vertices: u64,
    pub duplicate: Option<u64>,
}

impl RingReader {
    pub fn new(vertices: u64) -> Self {
        Self {
            vertices,
            duplicate: None,
        }
    }
}

#[async_trait]
impl VertexInputReader<Ints> for RingReader {
    async fn open(&self, split: InputSplit) -> Result<VertexStream<Ints>> {
        let n = self.vertices;
        let mut records: Vec<Result<VertexRecord<u64, i64, ()>>> = (0..n)
            .filter(|id| (*id as usize) % split.total == split.index)
            .map(|id| Ok(VertexRecord::new(id, id as i64).with_edge((id + 1) % n, ())))
            .collect();
        if let Some(id) = self.duplicate {
            if split.index + 1 == split.total {
                records.push(Ok(VertexRecord::new(id, 0)));
            }
        }
        Ok(futures::stream::iter(records).boxed())
    }
}

/// Propagates the largest id around the graph; halts when nothing changes.
pub struct MaxValue;

impl VertexCompute<Ints> for MaxValue {
    fn compute(&self, ctx: &mut ComputeContext<'_, Ints>, messages: &[i64]) -> std::result::Result<(), ComputeError> {
        let current = *ctx.value();
        let best = messages.iter().copied().fold(current, i64::max);
        if ctx.superstep() == 0 || best > current {
            ctx.set_value(best);
            ctx.send_to_all_edges(best);
        }
        ctx.vote_to_halt();
        Ok(())
    }
}

/// Never halts and never sends.
pub struct Spinner;

impl VertexCompute<Ints> for Spinner {
    fn compute(&self, ctx: &mut ComputeContext<'_, Ints>, _messages: &[i64]) -> std::result::Result<(), ComputeError> {
        let next = *ctx.value() + 1;
        ctx.set_value(next);
        Ok(())
    }
}

/// Halts on its first call without sending anything.
pub struct HaltAtOnce;

impl VertexCompute<Ints> for HaltAtOnce {
    fn compute(&self, ctx: &mut ComputeContext<'_, Ints>, _messages: &[i64]) -> std::result::Result<(), ComputeError> {
        ctx.vote_to_halt();
        Ok(())
    }
}

/// Fails for vertex 0 at `superstep`.
pub struct FailAt {
    pub superstep: u64,
}

impl VertexCompute<Ints> for FailAt {
    fn compute(&self, ctx: &mut ComputeContext<'_, Ints>, _messages: &[i64]) -> std::result::Result<(), ComputeError> {
        if ctx.superstep() == self.superstep && *ctx.id() == 0 {
            return Err(ComputeError::new("boom"));
        }
        if ctx.superstep() > self.superstep + 2 {
            ctx.vote_to_halt();
        }
        Ok(())
    }
}

pub struct SumCombiner;

impl Combiner<Ints> for SumCombiner {
    fn combine(&self, a: i64, b: i64) -> i64 {
        a + b
    }
}

/// Collects final values in memory and counts `finish` calls.
#[derive(Default)]
pub struct CollectingWriter {
    pub values: Mutex<BTreeMap<u64, i64>>,
    pub finished: AtomicU64,
}

impl CollectingWriter {
    pub fn snapshot(&self) -> BTreeMap<u64, i64> {
        self.values.lock().clone()
    }

    pub fn finish_calls(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VertexOutputWriter<Ints> for CollectingWriter {
    async fn write(&self, id: &u64, value: &i64) -> Result<()> {
        self.values.lock().insert(*id, *value);
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Config with plug-in keys filled in; the tests pass plug-ins directly.
pub fn config(workers: u32) -> JobConfig {
    JobConfig::new("test", "ring")
        .with_workers(workers)
        .with_partitions_per_worker(2)
}

pub fn job(
    config: JobConfig,
    compute: impl VertexCompute<Ints> + 'static,
    vertices: u64,
    writer: Arc<CollectingWriter>,
) -> BspJob<Ints> {
    let plugins = JobPlugins::new(Arc::new(compute), Arc::new(RingReader::new(vertices))).with_writer(writer);
    BspJob::new(config, plugins)
}

/// Wraps the in-memory store with injectable read and write failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryCheckpointStore,
    pub fail_saves_at: Option<u64>,
    pub fail_loads_at: Option<u64>,
    pub loads: Mutex<Vec<u64>>,
}

impl FlakyStore {
    pub fn loaded_supersteps(&self) -> Vec<u64> {
        let mut loads = self.loads.lock().clone();
        loads.dedup();
        loads
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save(&self, key: &CheckpointKey, blob: Vec<u8>) -> bsp_checkpoint::Result<CheckpointMetadata> {
        if self.fail_saves_at == Some(key.superstep) {
            return Err(CheckpointError::Storage(format!("disk full writing {}", key)));
        }
        self.inner.save(key, blob).await
    }

    async fn load(&self, key: &CheckpointKey) -> bsp_checkpoint::Result<StoredCheckpoint> {
        self.loads.lock().push(key.superstep);
        if self.fail_loads_at == Some(key.superstep) {
            return Err(CheckpointError::Storage(format!("unreadable {}", key)));
        }
        self.inner.load(key).await
    }

    async fn supersteps(&self, job_id: &str, partition: u32) -> bsp_checkpoint::Result<Vec<u64>> {
        self.inner.supersteps(job_id, partition).await
    }

    async fn discard_superstep(&self, job_id: &str, superstep: u64) -> bsp_checkpoint::Result<usize> {
        self.inner.discard_superstep(job_id, superstep).await
    }

    async fn delete_job(&self, job_id: &str) -> bsp_checkpoint::Result<()> {
        self.inner.delete_job(job_id).await
    }
}
