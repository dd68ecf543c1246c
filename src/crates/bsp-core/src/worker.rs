//! Worker: owns a fixed set of partitions and executes coordinator
//! directives against them.
//!
//! Each worker attempt is one tokio task with its own command channel. It
//! processes one directive at a time and answers every directive except
//! `Terminate` with exactly one event. Errors never get retried here; they
//! are reported and the coordinator decides what happens next.

use crate::aggregator::{AggregatedValues, AggregatorRegistry};
use crate::checkpoint::{CheckpointManager, PartitionSnapshot};
use crate::context::{GraphTotals, SuperstepContext};
use crate::error::{BspError, FailureKind, JobFailure, Result};
use crate::fault::{FaultAction, FaultInjector};
use crate::partition::PartitionState;
use crate::partitioner::{PartitionLayout, Partitioner};
use crate::plugin::{InputSplit, JobPlugins};
use crate::protocol::{AssembledPartition, Directive, WorkerCommand, WorkerEvent, WorkerEventKind};
use crate::router::{Generation, MessageExchange, MessageRouter};
use crate::types::{GraphTypes, PartitionId, Superstep, Vertex, WorkerId};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything a worker attempt shares with the rest of the job.
pub(crate) struct WorkerEnv<G: GraphTypes> {
    pub layout: PartitionLayout,
    pub plugins: JobPlugins<G>,
    pub partitioner: Arc<dyn Partitioner<G::Id>>,
    pub aggregators: Arc<AggregatorRegistry>,
    pub exchange: Arc<MessageExchange<G>>,
    pub checkpoints: CheckpointManager,
    pub faults: Arc<dyn FaultInjector>,
}

/// Coordinator's grip on a running worker attempt.
pub(crate) struct WorkerHandle {
    pub attempt: u32,
    pub commands: mpsc::UnboundedSender<Directive>,
    pub task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop the attempt whether or not it is responsive.
    pub fn kill(&self) {
        self.task.abort();
    }
}

enum Step {
    Reply(WorkerEventKind),
    Die,
    Hang,
}

pub(crate) struct Worker<G: GraphTypes> {
    id: WorkerId,
    attempt: u32,
    env: Arc<WorkerEnv<G>>,
    partitions: BTreeMap<PartitionId, PartitionState<G>>,
    commands: mpsc::UnboundedReceiver<Directive>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    round: u64,
}

impl<G: GraphTypes> Worker<G> {
    /// Launch attempt `attempt` of worker `id`.
    pub fn spawn(
        id: WorkerId,
        attempt: u32,
        env: Arc<WorkerEnv<G>>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> WorkerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            id,
            attempt,
            env,
            partitions: BTreeMap::new(),
            commands: commands_rx,
            events,
            round: 0,
        };
        tracing::debug!(worker = %id, attempt, "Worker launched");
        WorkerHandle {
            attempt,
            commands: commands_tx,
            task: tokio::spawn(worker.run()),
        }
    }

    async fn run(mut self) {
        while let Some(directive) = self.commands.recv().await {
            self.round = directive.round;
            if matches!(directive.command, WorkerCommand::Terminate) {
                tracing::debug!(worker = %self.id, attempt = self.attempt, "Worker terminating");
                return;
            }

            match self.handle(directive.generation, directive.command).await {
                Step::Reply(kind) => self.emit(kind),
                Step::Die => {
                    tracing::warn!(worker = %self.id, attempt = self.attempt, "Worker process terminated");
                    self.emit(WorkerEventKind::Terminated);
                    return;
                }
                Step::Hang => {
                    tracing::warn!(worker = %self.id, attempt = self.attempt, "Worker stalled");
                    futures::future::pending::<()>().await;
                }
            }
        }
    }

    fn emit(&self, kind: WorkerEventKind) {
        // The coordinator dropping its receiver means the job is over.
        let _ = self
            .events
            .send(WorkerEvent::new(self.id, self.attempt, self.round, kind));
    }

    fn fail(err: BspError, superstep: Option<Superstep>) -> Step {
        let mut failure = err.to_failure();
        if failure.superstep.is_none() {
            failure.superstep = superstep;
        }
        Step::Reply(WorkerEventKind::Failed(failure))
    }

    fn fault(action: FaultAction) -> Option<Step> {
        match action {
            FaultAction::Continue => None,
            FaultAction::Terminate => Some(Step::Die),
            FaultAction::Stall => Some(Step::Hang),
        }
    }

    async fn handle(&mut self, generation: Generation, command: WorkerCommand) -> Step {
        match command {
            WorkerCommand::Load { splits } => match self.load(generation, splits).await {
                Ok(vertices_read) => Step::Reply(WorkerEventKind::Loaded { vertices_read }),
                Err(err) => Self::fail(err, None),
            },
            WorkerCommand::Assemble => match self.assemble(generation) {
                Ok(partitions) => Step::Reply(WorkerEventKind::Assembled { partitions }),
                Err(err) => Self::fail(err, None),
            },
            WorkerCommand::RunSuperstep {
                superstep,
                totals,
                aggregated,
            } => {
                let action = self.env.faults.before_superstep(self.id, self.attempt, superstep);
                if let Some(step) = Self::fault(action) {
                    return step;
                }
                let step = SuperstepContext::new(superstep, totals, aggregated);
                match self.run_superstep(generation, &step) {
                    Ok(kind) => Step::Reply(kind),
                    Err(err) => Self::fail(err, Some(superstep)),
                }
            }
            WorkerCommand::Checkpoint {
                superstep,
                totals,
                aggregated,
            } => {
                let action = self.env.faults.before_checkpoint(self.id, self.attempt, superstep);
                if let Some(step) = Self::fault(action) {
                    return step;
                }
                Step::Reply(self.checkpoint(generation, superstep, totals, &aggregated).await)
            }
            WorkerCommand::Restore { superstep } => match self.restore(generation, superstep).await {
                Ok(kind) => Step::Reply(kind),
                Err(err) => Self::fail(err, Some(superstep)),
            },
            WorkerCommand::WriteOutput => match self.write_output().await {
                Ok(records) => Step::Reply(WorkerEventKind::OutputWritten { records }),
                Err(err) => Self::fail(err, None),
            },
            WorkerCommand::Terminate => Step::Die,
        }
    }

    async fn load(&self, generation: Generation, splits: Vec<InputSplit>) -> Result<u64> {
        let reads = splits
            .into_iter()
            .map(|split| self.read_split(generation, split));
        let counts = futures::future::try_join_all(reads).await?;
        Ok(counts.into_iter().sum())
    }

    async fn read_split(&self, generation: Generation, split: InputSplit) -> Result<u64> {
        let as_split_error = |err: BspError| match err {
            err @ BspError::InputSplit { .. } => err,
            other => BspError::input_split(split.index, other.to_string()),
        };

        let mut stream = self
            .env
            .plugins
            .reader
            .open(split)
            .await
            .map_err(as_split_error)?;

        let num_partitions = self.env.layout.num_partitions();
        let mut outgoing: BTreeMap<PartitionId, Vec<(usize, Vertex<G>)>> = BTreeMap::new();
        let mut count = 0u64;
        while let Some(vertex) = stream.next().await {
            let vertex = vertex.map_err(as_split_error)?;
            let partition = self.env.partitioner.partition_of(&vertex.id, num_partitions);
            outgoing.entry(partition).or_default().push((split.index, vertex));
            count += 1;
        }

        for (partition, vertices) in outgoing {
            self.env.exchange.ship_vertices(generation, partition, vertices);
        }
        tracing::debug!(worker = %self.id, split = %split, vertices = count, "Split loaded");
        Ok(count)
    }

    fn assemble(&mut self, generation: Generation) -> Result<Vec<AssembledPartition>> {
        let mut partitions = BTreeMap::new();
        let mut counts = Vec::new();
        for id in self.env.layout.partitions_of(self.id) {
            let state = PartitionState::assemble(id, self.env.exchange.take_vertices(generation, id))?;
            counts.push(AssembledPartition {
                partition: id,
                vertices: state.len() as u64,
                edges: state.num_edges(),
            });
            partitions.insert(id, state);
        }
        self.partitions = partitions;
        Ok(counts)
    }

    fn run_superstep(&mut self, generation: Generation, step: &SuperstepContext) -> Result<WorkerEventKind> {
        let env = Arc::clone(&self.env);
        let mut router = MessageRouter::new(
            env.layout.num_partitions(),
            Arc::clone(&env.partitioner),
            env.plugins.combiner.clone(),
        );

        let mut reports = Vec::with_capacity(self.partitions.len());
        for (id, partition) in self.partitions.iter_mut() {
            let inbox = env.exchange.take(generation, step.superstep, *id);
            let report = partition.compute_superstep(
                step,
                inbox,
                env.plugins.compute.as_ref(),
                &mut router,
                &env.aggregators,
            )?;
            reports.push(report);
        }

        let (batches, mut routing) = router.flush();
        routing.dropped = reports.iter().map(|r| r.dropped_messages).sum();
        for (partition, batch) in batches {
            env.exchange.deposit(generation, step.superstep + 1, partition, batch);
        }

        Ok(WorkerEventKind::SuperstepDone {
            superstep: step.superstep,
            reports,
            routing,
        })
    }

    async fn checkpoint(
        &self,
        generation: Generation,
        superstep: Superstep,
        totals: GraphTotals,
        aggregated: &AggregatedValues,
    ) -> WorkerEventKind {
        let mut saved = Vec::new();
        let mut failed = Vec::new();
        for (id, partition) in &self.partitions {
            let snapshot = PartitionSnapshot {
                partition: *id,
                superstep,
                vertices: partition.snapshot_vertices(),
                inbox: self.env.exchange.peek(generation, superstep, *id),
                aggregated: aggregated.clone(),
                totals,
            };
            match self.env.checkpoints.save::<G>(&snapshot).await {
                Ok(_) => saved.push(*id),
                Err(err) => {
                    tracing::warn!(
                        worker = %self.id,
                        partition = %id,
                        superstep,
                        error = %err,
                        "Checkpoint write failed"
                    );
                    failed.push((*id, err.to_string()));
                }
            }
        }
        WorkerEventKind::CheckpointDone {
            superstep,
            saved,
            failed,
        }
    }

    async fn restore(&mut self, generation: Generation, superstep: Superstep) -> Result<WorkerEventKind> {
        let mut restored = BTreeMap::new();
        let mut visible: Option<(GraphTotals, AggregatedValues)> = None;

        for id in self.env.layout.partitions_of(self.id) {
            let snapshot = self.env.checkpoints.load::<G>(superstep, id).await?;
            if snapshot.superstep != superstep || snapshot.partition != id {
                return Err(BspError::CheckpointIo(bsp_checkpoint::CheckpointError::Invalid(
                    format!(
                        "snapshot for {} at superstep {} found under {} at {}",
                        snapshot.partition, snapshot.superstep, id, superstep
                    ),
                )));
            }

            let mut state = PartitionState::new(id);
            state.restore(snapshot.vertices);
            self.env.exchange.deposit(generation, superstep, id, snapshot.inbox);
            restored.insert(id, state);
            visible.get_or_insert((snapshot.totals, snapshot.aggregated));
        }

        self.partitions = restored;
        let (totals, aggregated) = visible.unwrap_or_default();
        tracing::debug!(worker = %self.id, attempt = self.attempt, superstep, "Partitions restored");
        Ok(WorkerEventKind::Restored {
            superstep,
            totals,
            aggregated,
        })
    }

    async fn write_output(&self) -> Result<u64> {
        let Some(writer) = self.env.plugins.writer.as_ref() else {
            return Ok(0);
        };
        let mut records = 0u64;
        for partition in self.partitions.values() {
            for vertex in partition.vertices() {
                writer
                    .write(&vertex.id, &vertex.value)
                    .await
                    .map_err(|err| match err {
                        err @ BspError::Output(_) => err,
                        other => BspError::Output(other.to_string()),
                    })?;
                records += 1;
            }
        }
        Ok(records)
    }
}

/// Failure for a worker whose process went away.
pub(crate) fn terminated_failure(worker: WorkerId, attempt: u32, superstep: Option<Superstep>) -> JobFailure {
    let failure = JobFailure::new(
        FailureKind::WorkerFailure,
        format!("worker {} attempt {} terminated", worker, attempt),
    );
    match superstep {
        Some(s) => failure.with_superstep(s),
        None => failure,
    }
}
