//! Injectable worker faults.
//!
//! Workers ask the job's [`FaultInjector`] before every superstep and every
//! checkpoint. Returning [`FaultAction::Terminate`] makes the attempt behave
//! like a process that died (the coordinator sees a termination event);
//! [`FaultAction::Stall`] makes it stop responding, which only the barrier
//! timeout can detect.
//!
//! ```rust
//! use bsp_core::fault::{FaultAction, FaultInjector, ScriptedFaults};
//! use bsp_core::WorkerId;
//!
//! let faults = ScriptedFaults::new().terminate_once(WorkerId(0), 2);
//! assert_eq!(faults.before_superstep(WorkerId(0), 1, 2), FaultAction::Terminate);
//! assert_eq!(faults.before_superstep(WorkerId(0), 2, 2), FaultAction::Continue);
//! ```

use crate::types::{Superstep, WorkerId};
use parking_lot::Mutex;

/// What a worker attempt should do at a fault point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Continue,
    Terminate,
    Stall,
}

/// Decides whether a worker attempt fails at a given point.
pub trait FaultInjector: Send + Sync {
    fn before_superstep(&self, worker: WorkerId, attempt: u32, superstep: Superstep) -> FaultAction;

    fn before_checkpoint(
        &self,
        _worker: WorkerId,
        _attempt: u32,
        _superstep: Superstep,
    ) -> FaultAction {
        FaultAction::Continue
    }
}

/// Never injects anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn before_superstep(&self, _worker: WorkerId, _attempt: u32, _superstep: Superstep) -> FaultAction {
        FaultAction::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultPoint {
    Superstep,
    Checkpoint,
}

#[derive(Debug, Clone)]
struct FaultRule {
    point: FaultPoint,
    worker: WorkerId,
    superstep: Superstep,
    /// Only fire for this attempt; `None` fires for every attempt
    attempt: Option<u32>,
    action: FaultAction,
    fired: u32,
}

/// Rule-based injector for tests.
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    rules: Mutex<Vec<FaultRule>>,
}

impl ScriptedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    fn rule(
        self,
        point: FaultPoint,
        worker: WorkerId,
        superstep: Superstep,
        attempt: Option<u32>,
        action: FaultAction,
    ) -> Self {
        self.rules.lock().push(FaultRule {
            point,
            worker,
            superstep,
            attempt,
            action,
            fired: 0,
        });
        self
    }

    /// Kill the worker's first attempt when it reaches `superstep`.
    pub fn terminate_once(self, worker: WorkerId, superstep: Superstep) -> Self {
        self.rule(FaultPoint::Superstep, worker, superstep, Some(1), FaultAction::Terminate)
    }

    /// Kill every attempt of the worker when it reaches `superstep`.
    pub fn terminate_always(self, worker: WorkerId, superstep: Superstep) -> Self {
        self.rule(FaultPoint::Superstep, worker, superstep, None, FaultAction::Terminate)
    }

    /// Kill a specific attempt at `superstep`.
    pub fn terminate_attempt(self, worker: WorkerId, attempt: u32, superstep: Superstep) -> Self {
        self.rule(FaultPoint::Superstep, worker, superstep, Some(attempt), FaultAction::Terminate)
    }

    /// Hang the worker's first attempt at `superstep`.
    pub fn stall_once(self, worker: WorkerId, superstep: Superstep) -> Self {
        self.rule(FaultPoint::Superstep, worker, superstep, Some(1), FaultAction::Stall)
    }

    /// Kill the worker's first attempt while it writes the checkpoint for `superstep`.
    pub fn terminate_during_checkpoint(self, worker: WorkerId, superstep: Superstep) -> Self {
        self.rule(FaultPoint::Checkpoint, worker, superstep, Some(1), FaultAction::Terminate)
    }

    /// How many times any rule fired.
    pub fn fired(&self) -> u32 {
        self.rules.lock().iter().map(|r| r.fired).sum()
    }

    fn decide(&self, point: FaultPoint, worker: WorkerId, attempt: u32, superstep: Superstep) -> FaultAction {
        let mut rules = self.rules.lock();
        for rule in rules.iter_mut() {
            if rule.point == point
                && rule.worker == worker
                && rule.superstep == superstep
                && rule.attempt.map_or(true, |a| a == attempt)
            {
                rule.fired += 1;
                return rule.action;
            }
        }
        FaultAction::Continue
    }
}

impl FaultInjector for ScriptedFaults {
    fn before_superstep(&self, worker: WorkerId, attempt: u32, superstep: Superstep) -> FaultAction {
        self.decide(FaultPoint::Superstep, worker, attempt, superstep)
    }

    fn before_checkpoint(&self, worker: WorkerId, attempt: u32, superstep: Superstep) -> FaultAction {
        self.decide(FaultPoint::Checkpoint, worker, attempt, superstep)
    }
}
