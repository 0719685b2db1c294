//! Phase-partitioned task storage
//!
//! Every live task is physically stored in exactly one of three ordered maps
//! (initialized, pending, active). Moving a task between phases moves the
//! value itself, so a task can never be counted twice or lost. Terminated
//! tasks leave the registry; a bounded history of their final snapshots is
//! kept for observers.

use std::time::Instant;

use indexmap::IndexMap;

use crate::error::{PoolError, PoolResult};
use crate::task::{Task, TaskId, TaskSnapshot, TaskStatus};

/// The three registry collections plus terminated history
#[derive(Debug)]
pub struct TaskRegistry {
    next_id: u64,
    initialized: IndexMap<TaskId, Task>,
    pending: IndexMap<TaskId, Task>,
    active: IndexMap<TaskId, Task>,
    terminated: IndexMap<TaskId, TaskSnapshot>,
    history_limit: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TaskRegistry {
    /// Create an empty registry remembering at most `history_limit`
    /// terminated tasks
    pub fn new(history_limit: usize) -> Self {
        Self {
            next_id: 1,
            initialized: IndexMap::new(),
            pending: IndexMap::new(),
            active: IndexMap::new(),
            terminated: IndexMap::new(),
            history_limit,
        }
    }

    /// Allocate the next id and store a new `Initialized` task under it
    pub fn create(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.initialized.insert(id, Task::new(id));
        id
    }

    /// Whether `id` was ever handed out by this registry
    pub fn is_known(&self, id: TaskId) -> bool {
        id.0 >= 1 && id.0 < self.next_id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.initialized
            .get(&id)
            .or_else(|| self.pending.get(&id))
            .or_else(|| self.active.get(&id))
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        if let Some(task) = self.initialized.get_mut(&id) {
            return Some(task);
        }
        if let Some(task) = self.pending.get_mut(&id) {
            return Some(task);
        }
        self.active.get_mut(&id)
    }

    /// Current phase of `id`, or `None` if it was never allocated.
    ///
    /// Ids that were allocated but are no longer tracked are `Terminated`.
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        if let Some(task) = self.get(id) {
            return Some(task.status());
        }
        self.is_known(id).then_some(TaskStatus::Terminated)
    }

    /// Look up a task, live or from terminated history
    pub fn snapshot_of(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.get(id)
            .map(Task::snapshot)
            .or_else(|| self.terminated.get(&id).cloned())
    }

    /// Move an `Initialized` task to `Pending`.
    ///
    /// On failure the registry is left untouched.
    pub fn move_to_pending(&mut self, id: TaskId) -> PoolResult<&Task> {
        match advance(&mut self.initialized, id, Task::mark_pending) {
            Some(result) => Ok(&*self.pending.entry(id).or_insert(result?)),
            None => Err(self.wrong_phase(id, TaskStatus::Initialized)),
        }
    }

    /// Move a `Pending` task to `Active`, stamping its start time.
    pub fn move_to_active(&mut self, id: TaskId, now: Instant) -> PoolResult<&Task> {
        match advance(&mut self.pending, id, |task| task.mark_active(now)) {
            Some(result) => Ok(&*self.active.entry(id).or_insert(result?)),
            None => Err(self.wrong_phase(id, TaskStatus::Pending)),
        }
    }

    /// Drop a `Pending` or `Active` task from tracking and return its final
    /// snapshot.
    pub fn terminate(&mut self, id: TaskId) -> PoolResult<TaskSnapshot> {
        let task = match advance(&mut self.pending, id, Task::mark_terminated)
            .or_else(|| advance(&mut self.active, id, Task::mark_terminated))
        {
            Some(result) => result?,
            None => return Err(self.wrong_phase(id, TaskStatus::Active)),
        };

        let snapshot = task.snapshot();
        if self.history_limit > 0 {
            if self.terminated.len() == self.history_limit {
                self.terminated.shift_remove_index(0);
            }
            self.terminated.insert(id, snapshot.clone());
        }
        Ok(snapshot)
    }

    fn wrong_phase(&self, id: TaskId, expected: TaskStatus) -> PoolError {
        match self.status(id) {
            Some(actual) => PoolError::invalid_state(id, actual, expected),
            None => PoolError::NotFound(id),
        }
    }

    /// Active tasks ordered by start time, oldest first, ties by id
    pub fn active_by_start(&self) -> Vec<TaskId> {
        let mut ordered: Vec<(Option<Instant>, TaskId)> = self
            .active
            .values()
            .map(|task| (task.started_at(), task.id()))
            .collect();
        ordered.sort();
        ordered.into_iter().map(|(_, id)| id).collect()
    }

    pub fn initialized_count(&self) -> usize {
        self.initialized.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Every task not yet terminated, in phase order
    pub fn live_tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.initialized
            .values_mut()
            .chain(self.pending.values_mut())
            .chain(self.active.values_mut())
    }

    pub fn initialized(&self) -> Vec<TaskSnapshot> {
        self.initialized.values().map(Task::snapshot).collect()
    }

    pub fn pending(&self) -> Vec<TaskSnapshot> {
        self.pending.values().map(Task::snapshot).collect()
    }

    pub fn active(&self) -> Vec<TaskSnapshot> {
        self.active.values().map(Task::snapshot).collect()
    }

    pub fn terminated(&self) -> Vec<TaskSnapshot> {
        self.terminated.values().cloned().collect()
    }
}

/// Apply `step` to the task stored under `id` in `from` and, if it succeeds,
/// take the task out. `None` means `id` is not in `from`.
fn advance(
    from: &mut IndexMap<TaskId, Task>,
    id: TaskId,
    step: impl FnOnce(&mut Task) -> PoolResult<()>,
) -> Option<PoolResult<Task>> {
    let task = from.get_mut(&id)?;
    if let Err(err) = step(task) {
        return Some(Err(err));
    }
    from.shift_remove(&id).map(Ok)
}
