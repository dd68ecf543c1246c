//! Coordinator: the barrier and the global job state machine.
//!
//! ```text
//! Initializing ─▶ Loading ─▶ HaltingCheck ─┬─▶ Checkpointing? ─▶ RunningSuperstep ─▶ Barrier ─┐
//!                                          │                                                  │
//!                                          ◀──────────────────────────────────────────────────┘
//!                                          ├─▶ WritingOutput ─▶ Completed
//!                                          └─▶ Failed
//! ```
//!
//! # Rounds and generations
//!
//! Every broadcast opens a new round; workers echo the round on their
//! replies and the barrier only counts replies for the round it is waiting
//! on. Reloads and rollbacks additionally bump the exchange generation, so
//! an attempt that is still busy with an abandoned round writes into a
//! generation nobody reads again.
//!
//! # Recovery
//!
//! Any non-fatal worker fault charges one attempt to that worker; a barrier
//! timeout charges every worker that has not answered. If attempts remain,
//! the worker is relaunched and *every* partition rolls
//! back to the newest complete checkpoint. A checkpoint that cannot be read
//! back is dropped from the complete set and the next older one is tried
//! without charging an attempt. With nothing left to restore from the job
//! fails.

use crate::aggregator::AggregatedValues;
use crate::config::JobConfig;
use crate::context::GraphTotals;
use crate::error::{BspError, FailureKind, JobFailure, Result};
use crate::job::{JobOutcome, JobStats};
use crate::plugin::InputSplit;
use crate::protocol::{ControlMessage, Directive, WorkerCommand, WorkerEvent, WorkerEventKind, WorkerFault};
use crate::retry::RetryState;
use crate::router::{Generation, RoutingStats};
use crate::types::{Superstep, WorkerId};
use crate::worker::{terminated_failure, Worker, WorkerEnv, WorkerHandle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Global state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Initializing,
    Loading,
    RunningSuperstep,
    Barrier,
    Checkpointing,
    HaltingCheck,
    Recovering,
    WritingOutput,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Initializing => "INITIALIZING",
            JobState::Loading => "LOADING",
            JobState::RunningSuperstep => "RUNNING_SUPERSTEP",
            JobState::Barrier => "BARRIER",
            JobState::Checkpointing => "CHECKPOINTING",
            JobState::HaltingCheck => "HALTING_CHECK",
            JobState::Recovering => "RECOVERING",
            JobState::WritingOutput => "WRITING_OUTPUT",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub state: JobState,
    pub superstep: Superstep,
}

/// The coordinator's view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker: WorkerId,
    pub attempt: u32,
    pub last_reported_superstep: Option<Superstep>,
    pub active_vertices: u64,
    pub messages_sent: u64,
    pub healthy: bool,
}

struct WorkerSlot {
    handle: WorkerHandle,
    retry: RetryState,
    status: WorkerStatus,
}

/// Why a phase could not finish.
enum Interrupt {
    /// A worker failed; recovery may continue the job
    Fault(WorkerFault),
    /// The barrier deadline passed; one fault per worker that never answered
    TimedOut(Vec<WorkerFault>),
    /// The job cannot continue
    Fatal(BspError),
}

impl From<BspError> for Interrupt {
    fn from(err: BspError) -> Self {
        Interrupt::Fatal(err)
    }
}

type Phase<T> = std::result::Result<T, Interrupt>;

enum Incoming {
    Control(Option<ControlMessage>),
    Event(Option<WorkerEvent>),
}

/// Where execution continues after a rollback.
struct Resume {
    superstep: Superstep,
    aggregated: AggregatedValues,
}

/// Tallies of one completed superstep.
struct SuperstepSummary {
    active: u64,
    sent: u64,
    routing: RoutingStats,
    aggregated: AggregatedValues,
}

pub(crate) struct Coordinator<G: crate::types::GraphTypes> {
    config: Arc<JobConfig>,
    env: Arc<WorkerEnv<G>>,
    slots: BTreeMap<WorkerId, WorkerSlot>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    control_open: bool,
    progress: watch::Sender<JobProgress>,
    round: u64,
    generation: Generation,
    totals: GraphTotals,
    complete: BTreeSet<Superstep>,
    stats: JobStats,
}

impl<G: crate::types::GraphTypes> Coordinator<G> {
    pub fn new(
        config: Arc<JobConfig>,
        env: Arc<WorkerEnv<G>>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        progress: watch::Sender<JobProgress>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            env,
            slots: BTreeMap::new(),
            events_tx,
            events_rx,
            control_rx,
            control_open: true,
            progress,
            round: 0,
            generation: 0,
            totals: GraphTotals::default(),
            complete: BTreeSet::new(),
            stats: JobStats::default(),
        }
    }

    fn job_id(&self) -> &str {
        &self.config.job_id
    }

    fn set_state(&self, state: JobState, superstep: Superstep) {
        self.progress.send_replace(JobProgress { state, superstep });
    }

    /// Drive the job to a terminal state.
    pub async fn run(mut self) -> Result<JobOutcome> {
        tracing::info!(
            job = %self.job_id(),
            workers = self.env.layout.workers(),
            partitions = self.env.layout.num_partitions(),
            "Job starting"
        );
        let result = self.drive().await;
        let superstep = self.progress.borrow().superstep;

        match result {
            Ok(outcome) => {
                self.shutdown(false).await;
                self.set_state(JobState::Completed, superstep);
                tracing::info!(
                    job = %self.job_id(),
                    supersteps = outcome.supersteps,
                    recoveries = outcome.stats.recoveries,
                    "Job completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.shutdown(true).await;
                self.set_state(JobState::Failed, superstep);
                let failure = err.to_failure();
                tracing::error!(job = %self.job_id(), failure = %failure, "Job failed");
                Err(BspError::JobFailed(failure))
            }
        }
    }

    async fn drive(&mut self) -> Result<JobOutcome> {
        self.set_state(JobState::Initializing, 0);
        for worker in self.env.layout.all_workers() {
            self.launch(worker, RetryState::new());
        }

        self.load().await?;

        let mut superstep: Superstep = 0;
        let mut visible = Arc::new(self.env.aggregators.identities());
        // Tallies of the last completed barrier; `None` right after a rollback.
        let mut last: Option<(u64, u64)> = Some((self.totals.vertices, 0));

        loop {
            if let Some((active, sent)) = last {
                self.set_state(JobState::HaltingCheck, superstep);
                if active == 0 && sent == 0 {
                    tracing::info!(job = %self.job_id(), superstep, "All vertices halted, no messages in flight");
                    break;
                }
            }

            if let Some(max) = self.config.max_supersteps {
                if superstep >= max {
                    return Err(BspError::JobFailed(
                        JobFailure::new(
                            FailureKind::SuperstepLimit,
                            format!("job did not halt within {} supersteps", max),
                        )
                        .with_superstep(superstep),
                    ));
                }
            }

            if self.config.is_checkpoint_superstep(superstep) && !self.complete.contains(&superstep) {
                if let Err(interrupt) = self.checkpoint(superstep, &visible).await {
                    let faults = self.escalate(interrupt)?;
                    if let Err(err) = self.env.checkpoints.discard(superstep).await {
                        tracing::warn!(job = %self.job_id(), superstep, error = %err, "Could not discard checkpoint");
                    }
                    let resume = self.recover(faults).await?;
                    superstep = resume.superstep;
                    visible = Arc::new(resume.aggregated);
                    last = None;
                    continue;
                }
            }

            match self.superstep(superstep, &visible).await {
                Ok(summary) => {
                    tracing::info!(
                        job = %self.job_id(),
                        superstep,
                        active = summary.active,
                        sent = summary.sent,
                        transmitted = summary.routing.transmitted,
                        dropped = summary.routing.dropped,
                        "Superstep complete"
                    );
                    self.stats.messages_sent += summary.routing.sent;
                    self.stats.messages_transmitted += summary.routing.transmitted;
                    self.stats.messages_dropped += summary.routing.dropped;
                    visible = Arc::new(summary.aggregated);
                    last = Some((summary.active, summary.sent));
                    superstep += 1;
                }
                Err(interrupt) => {
                    let faults = self.escalate(interrupt)?;
                    let resume = self.recover(faults).await?;
                    superstep = resume.superstep;
                    visible = Arc::new(resume.aggregated);
                    last = None;
                }
            }
        }

        let records = self.write_output(superstep).await?;
        self.stats.records_written = records;
        if !self.config.keep_checkpoints && !self.complete.is_empty() {
            if let Err(err) = self.env.checkpoints.delete_all().await {
                tracing::warn!(job = %self.job_id(), error = %err, "Could not delete checkpoints");
            }
        }
        self.stats.vertices = self.totals.vertices;
        self.stats.edges = self.totals.edges;

        Ok(JobOutcome {
            job_id: self.job_id().to_string(),
            supersteps: superstep,
            aggregates: visible.as_ref().clone(),
            stats: self.stats.clone(),
            workers: self.slots.values().map(|slot| slot.status.clone()).collect(),
        })
    }

    /// Turn an interrupt into recoverable faults or a job error.
    fn escalate(&self, interrupt: Interrupt) -> Result<Vec<WorkerFault>> {
        match interrupt {
            Interrupt::Fault(fault) => Ok(vec![fault]),
            Interrupt::TimedOut(faults) => Ok(faults),
            Interrupt::Fatal(err) => Err(err),
        }
    }

    fn launch(&mut self, worker: WorkerId, mut retry: RetryState) {
        let attempt = retry.record_launch();
        let handle = Worker::spawn(worker, attempt, Arc::clone(&self.env), self.events_tx.clone());
        let status = WorkerStatus {
            worker,
            attempt,
            last_reported_superstep: None,
            active_vertices: 0,
            messages_sent: 0,
            healthy: true,
        };
        self.slots.insert(
            worker,
            WorkerSlot {
                handle,
                retry,
                status,
            },
        );
    }

    /// Open a new round and send each worker its command.
    fn broadcast<F>(&mut self, mut command: F) -> Phase<()>
    where
        F: FnMut(WorkerId) -> WorkerCommand,
    {
        self.round += 1;
        for (worker, slot) in &self.slots {
            let directive = Directive {
                round: self.round,
                generation: self.generation,
                command: command(*worker),
            };
            let name = directive.command.name();
            if slot.handle.commands.send(directive).is_err() {
                return Err(Interrupt::Fault(WorkerFault::new(
                    *worker,
                    slot.handle.attempt,
                    terminated_failure(*worker, slot.handle.attempt, None),
                )));
            }
            tracing::debug!(worker = %worker, round = self.round, command = name, "Directive sent");
        }
        Ok(())
    }

    /// Wait until every worker answered the current round.
    ///
    /// `on_event` sees each accepted reply; an error from it is a fault of
    /// the replying worker.
    async fn barrier<F>(&mut self, superstep: Option<Superstep>, mut on_event: F) -> Phase<()>
    where
        F: FnMut(WorkerId, WorkerEventKind) -> std::result::Result<(), JobFailure>,
    {
        let mut pending: BTreeSet<WorkerId> = self.slots.keys().copied().collect();
        let deadline = Instant::now() + self.config.barrier_timeout();

        while let Some(&first_pending) = pending.iter().next() {
            let incoming = {
                let control = &mut self.control_rx;
                let events = &mut self.events_rx;
                let control_open = self.control_open;
                tokio::time::timeout_at(deadline, async move {
                    tokio::select! {
                        biased;
                        message = control.recv(), if control_open => Incoming::Control(message),
                        event = events.recv() => Incoming::Event(event),
                    }
                })
                .await
            };

            let event = match incoming {
                Err(_) => {
                    let step = superstep.unwrap_or(0);
                    let faults = pending
                        .iter()
                        .map(|&worker| {
                            tracing::warn!(
                                job = %self.job_id(),
                                worker = %worker,
                                superstep = step,
                                "Barrier timed out"
                            );
                            let err = BspError::BarrierTimeout { worker, superstep: step };
                            WorkerFault::new(worker, self.attempt_of(worker), err.to_failure())
                        })
                        .collect();
                    return Err(Interrupt::TimedOut(faults));
                }
                Ok(Incoming::Control(None)) => {
                    self.control_open = false;
                    continue;
                }
                Ok(Incoming::Control(Some(ControlMessage::Abort))) => {
                    tracing::warn!(job = %self.job_id(), "Abort requested");
                    return Err(Interrupt::Fatal(BspError::Aborted));
                }
                Ok(Incoming::Control(Some(ControlMessage::KillWorker(worker)))) => {
                    let Some(slot) = self.slots.get(&worker) else {
                        tracing::warn!(job = %self.job_id(), worker = %worker, "Kill requested for unknown worker");
                        continue;
                    };
                    slot.handle.kill();
                    let attempt = slot.handle.attempt;
                    tracing::warn!(job = %self.job_id(), worker = %worker, attempt, "Worker process killed");
                    let failure = terminated_failure(worker, attempt, superstep);
                    return Err(Interrupt::Fault(WorkerFault::new(worker, attempt, failure)));
                }
                Ok(Incoming::Event(None)) => {
                    let attempt = self.attempt_of(first_pending);
                    return Err(Interrupt::Fatal(BspError::WorkerFailure {
                        worker: first_pending,
                        attempt,
                        reason: "event channel closed".to_string(),
                    }));
                }
                Ok(Incoming::Event(Some(event))) => event,
            };

            let current = self.attempt_of(event.worker);
            if event.attempt != current {
                tracing::debug!(event = %event, current, "Ignoring event from superseded attempt");
                continue;
            }

            let WorkerEvent { worker, attempt, round, kind } = event;
            match kind {
                WorkerEventKind::Terminated => {
                    return Err(Interrupt::Fault(WorkerFault::new(
                        worker,
                        attempt,
                        terminated_failure(worker, attempt, superstep),
                    )));
                }
                _ if round != self.round => {
                    tracing::debug!(worker = %worker, round, current = self.round, "Ignoring event from abandoned round");
                    continue;
                }
                WorkerEventKind::Failed(failure) => {
                    tracing::warn!(job = %self.job_id(), worker = %worker, attempt, failure = %failure, "Worker reported failure");
                    return Err(Interrupt::Fault(WorkerFault::new(worker, attempt, failure)));
                }
                kind => {
                    if !pending.remove(&worker) {
                        let failure = JobFailure::new(
                            FailureKind::WorkerFailure,
                            format!("{} reported twice in round {}", worker, round),
                        );
                        return Err(Interrupt::Fault(WorkerFault::new(worker, attempt, failure)));
                    }
                    if let (Some(expected), Some(reported)) = (superstep, kind.superstep()) {
                        if expected != reported {
                            let failure = JobFailure::new(
                                FailureKind::WorkerFailure,
                                format!("reported superstep {} while {} is running", reported, expected),
                            )
                            .with_superstep(expected);
                            return Err(Interrupt::Fault(WorkerFault::new(worker, attempt, failure)));
                        }
                    }
                    self.record_status(worker, &kind);
                    on_event(worker, kind).map_err(|failure| Interrupt::Fault(WorkerFault::new(worker, attempt, failure)))?;
                }
            }
        }
        Ok(())
    }

    fn attempt_of(&self, worker: WorkerId) -> u32 {
        self.slots.get(&worker).map_or(0, |slot| slot.handle.attempt)
    }

    fn record_status(&mut self, worker: WorkerId, kind: &WorkerEventKind) {
        let Some(slot) = self.slots.get_mut(&worker) else {
            return;
        };
        if let WorkerEventKind::SuperstepDone { superstep, reports, .. } = kind {
            slot.status.last_reported_superstep = Some(*superstep);
            slot.status.active_vertices = reports.iter().map(|r| r.active_vertices).sum();
            slot.status.messages_sent = reports.iter().map(|r| r.messages_sent).sum();
        }
    }

    /// Read input and assemble partitions, reloading from scratch on a
    /// recoverable fault.
    async fn load(&mut self) -> Result<()> {
        loop {
            self.set_state(JobState::Loading, 0);
            match self.load_once().await {
                Ok(()) => return Ok(()),
                Err(interrupt) => {
                    for fault in self.escalate(interrupt)? {
                        self.charge(fault).await?;
                    }
                    self.generation += 1;
                    self.env.exchange.retain_generation(self.generation);
                    tracing::warn!(job = %self.job_id(), generation = self.generation, "Reloading input");
                }
            }
        }
    }

    async fn load_once(&mut self) -> Phase<()> {
        let splits = InputSplit::all(self.config.num_splits());
        let workers = self.env.layout.workers() as usize;
        self.broadcast(|worker| WorkerCommand::Load {
            splits: splits
                .iter()
                .copied()
                .filter(|split| split.index % workers == worker.0 as usize)
                .collect(),
        })?;

        let mut read = 0u64;
        self.barrier(None, |_, kind| match kind {
            WorkerEventKind::Loaded { vertices_read } => {
                read += vertices_read;
                Ok(())
            }
            other => Err(unexpected("loaded", &other)),
        })
        .await?;

        self.broadcast(|_| WorkerCommand::Assemble)?;
        let mut totals = GraphTotals::default();
        self.barrier(None, |_, kind| match kind {
            WorkerEventKind::Assembled { partitions } => {
                for partition in partitions {
                    tracing::debug!(
                        partition = %partition.partition,
                        vertices = partition.vertices,
                        edges = partition.edges,
                        "Partition assembled"
                    );
                    totals.vertices += partition.vertices;
                    totals.edges += partition.edges;
                }
                Ok(())
            }
            other => Err(unexpected("assembled", &other)),
        })
        .await?;

        self.totals = totals;
        tracing::info!(
            job = %self.job_id(),
            splits = splits.len(),
            read,
            vertices = totals.vertices,
            edges = totals.edges,
            "Input loaded"
        );
        Ok(())
    }

    async fn superstep(&mut self, superstep: Superstep, visible: &Arc<AggregatedValues>) -> Phase<SuperstepSummary> {
        self.set_state(JobState::RunningSuperstep, superstep);
        let totals = self.totals;
        self.broadcast(|_| WorkerCommand::RunSuperstep {
            superstep,
            totals,
            aggregated: Arc::clone(visible),
        })?;

        self.set_state(JobState::Barrier, superstep);
        let registry = Arc::clone(&self.env.aggregators);
        let mut merger = registry.merger();
        let mut active = 0u64;
        let mut sent = 0u64;
        let mut routing = RoutingStats::default();

        self.barrier(Some(superstep), |_, kind| match kind {
            WorkerEventKind::SuperstepDone {
                reports,
                routing: worker_routing,
                ..
            } => {
                for report in &reports {
                    merger
                        .absorb(&report.aggregates)
                        .map_err(|err| err.to_failure().with_partition(report.partition).with_superstep(superstep))?;
                    active += report.active_vertices;
                    sent += report.messages_sent;
                }
                routing += worker_routing;
                Ok(())
            }
            other => Err(unexpected("superstep_done", &other)),
        })
        .await?;

        Ok(SuperstepSummary {
            active,
            sent,
            routing,
            aggregated: merger.finish(),
        })
    }

    /// Have every partition snapshot itself at the start of `superstep`.
    ///
    /// A failed write only makes this superstep unusable for recovery; a
    /// worker fault interrupts the phase.
    async fn checkpoint(&mut self, superstep: Superstep, visible: &Arc<AggregatedValues>) -> Phase<()> {
        self.set_state(JobState::Checkpointing, superstep);
        let totals = self.totals;
        self.broadcast(|_| WorkerCommand::Checkpoint {
            superstep,
            totals,
            aggregated: Arc::clone(visible),
        })?;

        let mut failed = Vec::new();
        self.barrier(Some(superstep), |_, kind| match kind {
            WorkerEventKind::CheckpointDone { failed: errors, .. } => {
                failed.extend(errors);
                Ok(())
            }
            other => Err(unexpected("checkpoint_done", &other)),
        })
        .await?;

        if failed.is_empty() {
            self.complete.insert(superstep);
            self.stats.checkpoints_written += 1;
            tracing::info!(job = %self.job_id(), superstep, "Checkpoint complete");
        } else {
            for (partition, reason) in &failed {
                tracing::warn!(job = %self.job_id(), partition = %partition, superstep, reason = %reason, "Partition checkpoint missing");
            }
            if let Err(err) = self.env.checkpoints.discard(superstep).await {
                tracing::warn!(job = %self.job_id(), superstep, error = %err, "Could not discard incomplete checkpoint");
            }
        }
        Ok(())
    }

    /// Charge the fault to its worker and relaunch it, or fail the job.
    async fn charge(&mut self, fault: WorkerFault) -> Result<()> {
        let job = self.job_id().to_string();
        let max_attempts = self.config.max_attempts;

        if fault.is_fatal() {
            return Err(BspError::JobFailed(fault.failure));
        }

        let Some(slot) = self.slots.get_mut(&fault.worker) else {
            return Err(BspError::JobFailed(fault.failure));
        };
        if fault.attempt != slot.handle.attempt {
            tracing::debug!(worker = %fault.worker, attempt = fault.attempt, "Fault from superseded attempt");
            return Ok(());
        }

        slot.handle.kill();
        slot.status.healthy = false;
        slot.retry.record_failure(fault.failure.to_string());

        if !self.config.relaunch_backoff.should_retry(fault.attempt, max_attempts) {
            let mut failure = fault.failure;
            failure.reason = format!("{} (after {} attempts)", failure.reason, fault.attempt);
            return Err(BspError::JobFailed(failure));
        }

        let retry = slot.retry.clone();
        let delay = self.config.relaunch_backoff.calculate_delay(fault.attempt);
        tracing::warn!(
            job = %job,
            worker = %fault.worker,
            attempt = fault.attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            failure = %fault.failure,
            "Relaunching worker"
        );
        if !delay.is_zero() {
            let superstep = self.progress.borrow().superstep;
            self.set_state(JobState::Recovering, superstep);
            self.backoff(delay).await?;
        }
        self.launch(fault.worker, retry);
        Ok(())
    }

    /// Sleep out a relaunch delay while still honouring control messages.
    async fn backoff(&mut self, delay: std::time::Duration) -> Result<()> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let message = {
                let control = &mut self.control_rx;
                let control_open = self.control_open;
                tokio::select! {
                    biased;
                    message = control.recv(), if control_open => Some(message),
                    _ = &mut sleep => None,
                }
            };

            match message {
                None => return Ok(()),
                Some(None) => self.control_open = false,
                Some(Some(ControlMessage::Abort)) => {
                    tracing::warn!(job = %self.job_id(), "Abort requested during relaunch backoff");
                    return Err(BspError::Aborted);
                }
                // The next broadcast or barrier finds the dead worker and charges it.
                Some(Some(ControlMessage::KillWorker(worker))) => match self.slots.get(&worker) {
                    Some(slot) => {
                        slot.handle.kill();
                        tracing::warn!(job = %self.job_id(), worker = %worker, "Worker process killed during backoff");
                    }
                    None => {
                        tracing::warn!(job = %self.job_id(), worker = %worker, "Kill requested for unknown worker");
                    }
                },
            }
        }
    }

    /// Relaunch the faulted worker and roll every partition back to the
    /// newest complete checkpoint.
    async fn recover(&mut self, faults: Vec<WorkerFault>) -> Result<Resume> {
        let origin = faults
            .first()
            .map(|fault| fault.failure.clone())
            .unwrap_or_else(|| JobFailure::new(FailureKind::WorkerFailure, "worker fault"));
        for fault in faults {
            self.charge(fault).await?;
        }

        loop {
            let Some(&superstep) = self.complete.iter().next_back() else {
                let mut failure = origin;
                failure.reason = format!("{}; no complete checkpoint", failure.reason);
                return Err(BspError::JobFailed(failure));
            };

            self.set_state(JobState::Recovering, superstep);
            self.generation += 1;
            self.env.exchange.retain_generation(self.generation);
            tracing::warn!(
                job = %self.job_id(),
                superstep,
                generation = self.generation,
                "Rolling back to checkpoint"
            );

            match self.restore(superstep).await {
                Ok(aggregated) => {
                    self.stats.recoveries += 1;
                    return Ok(Resume { superstep, aggregated });
                }
                Err(Interrupt::Fatal(err)) => return Err(err),
                Err(Interrupt::Fault(fault)) if fault.kind() == FailureKind::CheckpointIo => {
                    tracing::warn!(
                        job = %self.job_id(),
                        superstep,
                        failure = %fault.failure,
                        "Checkpoint unreadable, trying an older one"
                    );
                    self.complete.remove(&superstep);
                }
                Err(interrupt) => {
                    for fault in self.escalate(interrupt)? {
                        self.charge(fault).await?;
                    }
                }
            }
        }
    }

    async fn restore(&mut self, superstep: Superstep) -> Phase<AggregatedValues> {
        self.broadcast(|_| WorkerCommand::Restore { superstep })?;
        let mut visible: Option<AggregatedValues> = None;
        self.barrier(Some(superstep), |_, kind| match kind {
            WorkerEventKind::Restored { aggregated, .. } => {
                visible.get_or_insert(aggregated);
                Ok(())
            }
            other => Err(unexpected("restored", &other)),
        })
        .await?;
        Ok(visible.unwrap_or_else(|| self.env.aggregators.identities()))
    }

    async fn write_output(&mut self, superstep: Superstep) -> Result<u64> {
        let Some(writer) = self.env.plugins.writer.clone() else {
            return Ok(0);
        };
        self.set_state(JobState::WritingOutput, superstep);
        self.broadcast(|_| WorkerCommand::WriteOutput)
            .map_err(|interrupt| output_failure(interrupt, superstep))?;

        let mut records = 0u64;
        self.barrier(None, |_, kind| match kind {
            WorkerEventKind::OutputWritten { records: written } => {
                records += written;
                Ok(())
            }
            other => Err(unexpected("output_written", &other)),
        })
        .await
        .map_err(|interrupt| output_failure(interrupt, superstep))?;

        writer.finish().await.map_err(|err| match err {
            err @ BspError::Output(_) => err,
            other => BspError::Output(other.to_string()),
        })?;
        tracing::info!(job = %self.job_id(), records, "Output written");
        Ok(records)
    }

    /// Stop every worker attempt.
    async fn shutdown(&mut self, abort: bool) {
        let round = self.round + 1;
        for slot in std::mem::take(&mut self.slots).into_values() {
            if abort {
                slot.handle.kill();
                continue;
            }
            let _ = slot.handle.commands.send(Directive {
                round,
                generation: self.generation,
                command: WorkerCommand::Terminate,
            });
            if let Err(err) = slot.handle.task.await {
                if !err.is_cancelled() {
                    tracing::warn!(worker = %slot.status.worker, error = %err, "Worker task panicked");
                }
            }
        }
        self.env.exchange.clear();
    }
}

fn unexpected(expected: &str, got: &WorkerEventKind) -> JobFailure {
    JobFailure::new(
        FailureKind::WorkerFailure,
        format!("expected {} but worker sent {}", expected, got.name()),
    )
}

/// Output is published once; a fault while writing it ends the job.
fn output_failure(interrupt: Interrupt, superstep: Superstep) -> BspError {
    let fault = match interrupt {
        Interrupt::Fatal(err) => return err,
        Interrupt::Fault(fault) => fault,
        Interrupt::TimedOut(faults) => match faults.into_iter().next() {
            Some(fault) => fault,
            None => return BspError::Output("output barrier timed out".to_string()),
        },
    };
    let mut failure = fault.failure;
    if failure.kind == FailureKind::WorkerFailure {
        failure.kind = FailureKind::Output;
    }
    BspError::JobFailed(failure.with_superstep(superstep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorRegistry;
    use crate::checkpoint::CheckpointManager;
    use crate::context::ComputeContext;
    use crate::error::ComputeError;
    use crate::fault::NoFaults;
    use crate::partitioner::{HashPartitioner, PartitionLayout};
    use crate::plugin::{JobPlugins, VertexCompute, VertexInputReader, VertexStream};
    use crate::router::MessageExchange;
    use crate::types::GraphTypes;
    use async_trait::async_trait;
    use bsp_checkpoint::{CheckpointCodec, InMemoryCheckpointStore};
    use futures::StreamExt;
    use std::time::Duration;

    struct Ints;

    impl GraphTypes for Ints {
        type Id = u64;
        type Value = i64;
        type Edge = ();
        type Message = i64;
    }

    struct Idle;

    impl VertexCompute<Ints> for Idle {
        fn compute(
            &self,
            ctx: &mut ComputeContext<'_, Ints>,
            _messages: &[i64],
        ) -> std::result::Result<(), ComputeError> {
            ctx.vote_to_halt();
            Ok(())
        }
    }

    struct Empty;

    #[async_trait]
    impl VertexInputReader<Ints> for Empty {
        async fn open(&self, _split: InputSplit) -> Result<VertexStream<Ints>> {
            Ok(futures::stream::empty().boxed())
        }
    }

    /// Coordinator over parked worker slots, all on attempt 1, waiting on round 1.
    fn coordinator(workers: u32) -> (Coordinator<Ints>, mpsc::UnboundedSender<ControlMessage>) {
        let config = JobConfig::new("idle", "empty")
            .with_workers(workers)
            .with_barrier_timeout(Duration::from_secs(5));
        let env = WorkerEnv {
            layout: PartitionLayout::new(workers, 1),
            plugins: JobPlugins::new(Arc::new(Idle), Arc::new(Empty)),
            partitioner: Arc::new(HashPartitioner),
            aggregators: Arc::new(AggregatorRegistry::new()),
            exchange: Arc::new(MessageExchange::new()),
            checkpoints: CheckpointManager::new("idle", CheckpointCodec::default(), Arc::new(InMemoryCheckpointStore::new())),
            faults: Arc::new(NoFaults),
        };
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (progress, _) = watch::channel(JobProgress {
            state: JobState::Initializing,
            superstep: 0,
        });

        let mut coordinator = Coordinator::new(Arc::new(config), Arc::new(env), control_rx, progress);
        for id in 0..workers {
            let worker = WorkerId(id);
            let (commands, _) = mpsc::unbounded_channel();
            coordinator.slots.insert(
                worker,
                WorkerSlot {
                    handle: WorkerHandle {
                        attempt: 1,
                        commands,
                        task: tokio::spawn(futures::future::pending::<()>()),
                    },
                    retry: RetryState {
                        attempts: 1,
                        last_error: None,
                    },
                    status: WorkerStatus {
                        worker,
                        attempt: 1,
                        last_reported_superstep: None,
                        active_vertices: 0,
                        messages_sent: 0,
                        healthy: true,
                    },
                },
            );
        }
        coordinator.round = 1;
        (coordinator, control_tx)
    }

    fn done(worker: u32, attempt: u32, round: u64, superstep: Superstep) -> WorkerEvent {
        WorkerEvent::new(
            WorkerId(worker),
            attempt,
            round,
            WorkerEventKind::SuperstepDone {
                superstep,
                reports: Vec::new(),
                routing: RoutingStats::default(),
            },
        )
    }

    fn failed(worker: u32, attempt: u32, round: u64) -> WorkerEvent {
        WorkerEvent::new(
            WorkerId(worker),
            attempt,
            round,
            WorkerEventKind::Failed(JobFailure::new(FailureKind::Compute, "boom")),
        )
    }

    fn send(coordinator: &Coordinator<Ints>, events: Vec<WorkerEvent>) {
        for event in events {
            coordinator.events_tx.send(event).unwrap();
        }
    }

    async fn wait(coordinator: &mut Coordinator<Ints>, superstep: Superstep) -> Phase<()> {
        coordinator.barrier(Some(superstep), |_, _| Ok(())).await
    }

    fn expect_fault(result: Phase<()>) -> WorkerFault {
        match result {
            Err(Interrupt::Fault(fault)) => fault,
            Err(Interrupt::TimedOut(faults)) => panic!("barrier timed out on {} workers", faults.len()),
            Err(Interrupt::Fatal(err)) => panic!("unexpected fatal error: {err}"),
            Ok(()) => panic!("barrier completed"),
        }
    }

    #[tokio::test]
    async fn test_reports_complete_the_barrier() {
        let (mut coordinator, _control) = coordinator(2);
        send(&coordinator, vec![done(1, 1, 1, 3), done(0, 1, 1, 3)]);

        assert!(wait(&mut coordinator, 3).await.is_ok());
        for slot in coordinator.slots.values() {
            assert_eq!(slot.status.last_reported_superstep, Some(3));
        }
    }

    #[tokio::test]
    async fn test_wrong_superstep_is_a_fault() {
        let (mut coordinator, _control) = coordinator(2);
        send(&coordinator, vec![done(0, 1, 1, 4)]);

        let fault = expect_fault(wait(&mut coordinator, 3).await);
        assert_eq!(fault.worker, WorkerId(0));
        assert_eq!(fault.attempt, 1);
        assert_eq!(fault.kind(), FailureKind::WorkerFailure);
        assert!(fault.failure.reason.contains("reported superstep 4"));
    }

    #[tokio::test]
    async fn test_superseded_attempt_is_ignored() {
        let (mut coordinator, _control) = coordinator(2);
        if let Some(slot) = coordinator.slots.get_mut(&WorkerId(0)) {
            slot.handle.attempt = 2;
        }
        send(
            &coordinator,
            vec![
                failed(0, 1, 1),
                WorkerEvent::new(WorkerId(0), 1, 1, WorkerEventKind::Terminated),
                done(0, 1, 1, 9),
                done(0, 2, 1, 3),
                done(1, 1, 1, 3),
            ],
        );

        assert!(wait(&mut coordinator, 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_round_is_ignored() {
        let (mut coordinator, _control) = coordinator(2);
        coordinator.round = 2;
        send(
            &coordinator,
            vec![
                done(0, 1, 1, 2),
                failed(1, 1, 1),
                done(0, 1, 2, 3),
                done(1, 1, 2, 3),
            ],
        );

        assert!(wait(&mut coordinator, 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_termination_counts_in_any_round() {
        let (mut coordinator, _control) = coordinator(2);
        coordinator.round = 2;
        send(
            &coordinator,
            vec![WorkerEvent::new(WorkerId(1), 1, 1, WorkerEventKind::Terminated)],
        );

        let fault = expect_fault(wait(&mut coordinator, 3).await);
        assert_eq!(fault.worker, WorkerId(1));
        assert!(fault.failure.reason.contains("terminated"));
    }

    #[tokio::test]
    async fn test_duplicate_report_is_a_fault() {
        let (mut coordinator, _control) = coordinator(2);
        send(&coordinator, vec![done(0, 1, 1, 3), done(0, 1, 1, 3)]);

        let fault = expect_fault(wait(&mut coordinator, 3).await);
        assert_eq!(fault.worker, WorkerId(0));
        assert!(fault.failure.reason.contains("reported twice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_faults_every_silent_worker() {
        let (mut coordinator, _control) = coordinator(3);
        send(&coordinator, vec![done(1, 1, 1, 3)]);

        let faults = match wait(&mut coordinator, 3).await {
            Err(Interrupt::TimedOut(faults)) => faults,
            _ => panic!("expected a barrier timeout"),
        };
        let workers: Vec<WorkerId> = faults.iter().map(|fault| fault.worker).collect();
        assert_eq!(workers, vec![WorkerId(0), WorkerId(2)]);
        assert!(faults.iter().all(|fault| fault.kind() == FailureKind::BarrierTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cuts_backoff_short() {
        let (mut coordinator, control) = coordinator(1);
        control.send(ControlMessage::Abort).unwrap();

        let started = Instant::now();
        let err = coordinator.backoff(Duration::MAX).await.unwrap_err();
        assert!(matches!(err, BspError::Aborted));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_survives_closed_control_channel() {
        let (mut coordinator, control) = coordinator(1);
        drop(control);

        let started = Instant::now();
        coordinator.backoff(Duration::from_secs(30)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(!coordinator.control_open);
    }
}
