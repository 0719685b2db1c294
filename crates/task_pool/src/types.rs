//! Observation types shared by the scheduler and its observers

use serde::{Deserialize, Serialize};

use crate::gate::GateSnapshot;
use crate::task::{TaskId, TaskSnapshot};

/// Cumulative counters for one scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Tasks created
    pub created: u64,

    /// Tasks moved from initialized to pending
    pub scheduled: u64,

    /// Tasks granted a permit
    pub admitted: u64,

    /// Active tasks stopped on their own request
    pub completed: u64,

    /// Active tasks stopped by a capacity decrease or a forced request
    pub forced_stops: u64,

    /// Tasks terminated before ever being admitted
    pub cancelled_while_pending: u64,

    /// Highest number of simultaneously active tasks
    pub peak_active: usize,
}

impl PoolStats {
    /// Total tasks that reached `Terminated`
    pub fn terminated(&self) -> u64 {
        self.completed + self.forced_stops + self.cancelled_while_pending
    }

    pub(crate) fn record_admission(&mut self, active_now: usize) {
        self.admitted += 1;
        self.peak_active = self.peak_active.max(active_now);
    }

    pub(crate) fn record_termination(&mut self, was_active: bool, forced: bool) {
        match (was_active, forced) {
            (false, _) => self.cancelled_while_pending += 1,
            (true, true) => self.forced_stops += 1,
            (true, false) => self.completed += 1,
        }
    }
}

/// Consistent point-in-time view of the whole pool.
///
/// `initialized`, `pending` and `active` are the registry collections in
/// insertion order; every live task appears in exactly one of them.
/// `terminated` is a bounded history, not a registry collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub initialized: Vec<TaskSnapshot>,
    pub pending: Vec<TaskSnapshot>,
    pub active: Vec<TaskSnapshot>,
    pub terminated: Vec<TaskSnapshot>,
    pub gate: GateSnapshot,
    pub stats: PoolStats,
}

impl PoolSnapshot {
    /// Find a task in any of the lists
    pub fn find(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.initialized
            .iter()
            .chain(&self.pending)
            .chain(&self.active)
            .chain(&self.terminated)
            .find(|task| task.id == id)
    }

    pub fn initialized_ids(&self) -> Vec<TaskId> {
        self.initialized.iter().map(|task| task.id).collect()
    }

    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.iter().map(|task| task.id).collect()
    }

    pub fn active_ids(&self) -> Vec<TaskId> {
        self.active.iter().map(|task| task.id).collect()
    }

    /// No capacity reduction is waiting on releases
    pub fn is_steady(&self) -> bool {
        self.gate.pending_reduction == 0
    }
}
