//! Public entry point: configure, start, observe and join a job.

use crate::aggregator::{AggregateValue, AggregatedValues, AggregatorRegistry};
use crate::checkpoint::CheckpointManager;
use crate::config::JobConfig;
use crate::coordinator::{Coordinator, JobProgress, JobState, WorkerStatus};
use crate::error::{BspError, FailureKind, JobFailure, Result};
use crate::fault::{FaultInjector, NoFaults};
use crate::partitioner::{HashPartitioner, PartitionLayout, Partitioner};
use crate::plugin::{JobPlugins, PluginRegistry};
use crate::protocol::ControlMessage;
use crate::router::MessageExchange;
use crate::types::{GraphTypes, WorkerId};
use crate::worker::WorkerEnv;
use bsp_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Counters collected over the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub vertices: u64,
    pub edges: u64,
    /// Messages produced by compute calls, replays included
    pub messages_sent: u64,
    pub messages_transmitted: u64,
    /// Messages addressed to vertices that do not exist
    pub messages_dropped: u64,
    pub checkpoints_written: u64,
    pub recoveries: u64,
    pub records_written: u64,
}

/// Result of a job that reached COMPLETED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    /// Supersteps executed before the halting check succeeded
    pub supersteps: u64,
    /// Aggregated values of the last executed superstep
    pub aggregates: AggregatedValues,
    pub stats: JobStats,
    pub workers: Vec<WorkerStatus>,
}

impl JobOutcome {
    pub fn aggregate(&self, name: &str) -> Option<AggregateValue> {
        self.aggregates.get(name)
    }
}

/// A configured job, ready to start.
///
/// # Example
///
/// ```rust,ignore
/// let registry = bsp_prebuilt::default_registry();
/// let config = JobConfig::new("page_rank", "page_rank_fixture").with_workers(2);
/// let outcome = BspJob::from_registry(config, &registry)?.run().await?;
/// println!("max rank {:?}", outcome.aggregate("max"));
/// ```
pub struct BspJob<G: GraphTypes> {
    config: JobConfig,
    plugins: JobPlugins<G>,
    store: Arc<dyn CheckpointStore>,
    partitioner: Arc<dyn Partitioner<G::Id>>,
    faults: Arc<dyn FaultInjector>,
}

impl<G: GraphTypes> BspJob<G> {
    pub fn new(config: JobConfig, plugins: JobPlugins<G>) -> Self {
        Self {
            config,
            plugins,
            store: Arc::new(InMemoryCheckpointStore::new()),
            partitioner: Arc::new(HashPartitioner),
            faults: Arc::new(NoFaults),
        }
    }

    /// Resolve the plug-in keys in `config` through `registry`.
    pub fn from_registry(config: JobConfig, registry: &PluginRegistry<G>) -> Result<Self> {
        let plugins = JobPlugins::resolve(&config, registry)?;
        Ok(Self::new(config, plugins))
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_partitioner(mut self, partitioner: impl Partitioner<G::Id> + 'static) -> Self {
        self.partitioner = Arc::new(partitioner);
        self
    }

    pub fn with_fault_injector(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Validate and spawn the coordinator. Must be called within a tokio runtime.
    pub fn start(self) -> Result<JobHandle> {
        self.config.validate()?;

        let mut aggregators = AggregatorRegistry::new();
        self.plugins.compute.register_aggregators(&mut aggregators)?;

        let config = Arc::new(self.config);
        let env = Arc::new(WorkerEnv {
            layout: PartitionLayout::new(config.workers, config.partitions_per_worker),
            plugins: self.plugins,
            partitioner: self.partitioner,
            aggregators: Arc::new(aggregators),
            exchange: Arc::new(MessageExchange::new()),
            checkpoints: CheckpointManager::new(config.job_id.clone(), config.checkpoint_codec, self.store),
            faults: self.faults,
        });

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = watch::channel(JobProgress {
            state: JobState::Initializing,
            superstep: 0,
        });

        let job_id = config.job_id.clone();
        let coordinator = Coordinator::new(config, env, control_rx, progress_tx);
        let task = tokio::spawn(coordinator.run());

        Ok(JobHandle {
            job_id,
            control: control_tx,
            progress: progress_rx,
            task,
        })
    }

    /// Start the job and wait for its outcome.
    pub async fn run(self) -> Result<JobOutcome> {
        self.start()?.join().await
    }
}

/// Handle to a running job.
pub struct JobHandle {
    job_id: String,
    control: mpsc::UnboundedSender<ControlMessage>,
    progress: watch::Receiver<JobProgress>,
    task: JoinHandle<Result<JobOutcome>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Cancel the job. It ends FAILED with [`FailureKind::Aborted`].
    pub fn abort(&self) {
        if self.control.send(ControlMessage::Abort).is_err() {
            tracing::debug!(job = %self.job_id, "Abort after job finished");
        }
    }

    /// Simulate the process of `worker` dying.
    pub fn kill_worker(&self, worker: WorkerId) {
        if self.control.send(ControlMessage::KillWorker(worker)).is_err() {
            tracing::debug!(job = %self.job_id, worker = %worker, "Kill after job finished");
        }
    }

    pub fn progress(&self) -> JobProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    /// Wait for the job to reach a terminal state.
    pub async fn join(self) -> Result<JobOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(BspError::JobFailed(JobFailure::new(
                FailureKind::WorkerFailure,
                format!("coordinator task ended abnormally: {}", err),
            ))),
        }
    }
}
