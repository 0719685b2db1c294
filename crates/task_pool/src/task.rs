//! Task entity and its lifecycle state

use std::fmt::{self, Display};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelHandle;
use crate::error::{PoolError, PoolResult};

/// Unique identifier for a task, assigned monotonically by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a task.
///
/// Transitions only move forward:
/// `Initialized -> Pending -> Active -> Terminated`, plus the
/// `Pending -> Terminated` shortcut for a task cancelled before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created, not yet scheduled
    Initialized,
    /// Waiting for a permit from the admission gate
    Pending,
    /// Holding a permit and running its work loop
    Active,
    /// Finished; absorbing
    Terminated,
}

impl TaskStatus {
    /// Check if the task has reached its final state
    pub fn is_terminated(&self) -> bool {
        matches!(self, TaskStatus::Terminated)
    }

    /// Check if the task currently holds a permit
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Active)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Initialized => "Initialized",
            TaskStatus::Pending => "Pending",
            TaskStatus::Active => "Active",
            TaskStatus::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// One unit of schedulable work.
///
/// The scheduler owns every `Task`; outside observers see [`TaskSnapshot`]s.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    status: TaskStatus,
    work_counter: u64,
    started_at: Option<Instant>,
    forced_stop: bool,
    cancel: CancelHandle,
}

impl Task {
    /// Create a task in `Initialized` with a fresh cancellation handle
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            status: TaskStatus::Initialized,
            work_counter: 0,
            started_at: None,
            forced_stop: false,
            cancel: CancelHandle::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn work_counter(&self) -> u64 {
        self.work_counter
    }

    /// The instant the task became `Active`, if it ever did
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn forced_stop(&self) -> bool {
        self.forced_stop
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Record one completed unit of work.
    ///
    /// Fails with [`PoolError::Cancelled`] once the handle has been raised, which
    /// is how the work loop learns to unwind.
    pub fn increment(&mut self) -> PoolResult<u64> {
        if self.cancel.is_raised() {
            return Err(PoolError::Cancelled);
        }
        self.work_counter += 1;
        Ok(self.work_counter)
    }

    /// Raise the task's handle, recording whether the stop was forced.
    ///
    /// Only the first request is recorded; later ones return `false` and change
    /// nothing.
    pub fn request_stop(&mut self, forced: bool) -> bool {
        if self.cancel.is_raised() {
            return false;
        }
        self.forced_stop = forced;
        self.cancel.raise();
        true
    }

    pub(crate) fn mark_pending(&mut self) -> PoolResult<()> {
        self.expect_status(TaskStatus::Initialized)?;
        self.status = TaskStatus::Pending;
        Ok(())
    }

    pub(crate) fn mark_active(&mut self, now: Instant) -> PoolResult<()> {
        self.expect_status(TaskStatus::Pending)?;
        self.status = TaskStatus::Active;
        self.started_at = Some(now);
        Ok(())
    }

    pub(crate) fn mark_terminated(&mut self) -> PoolResult<()> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Active => {
                self.status = TaskStatus::Terminated;
                Ok(())
            }
            actual => Err(PoolError::invalid_state(self.id, actual, TaskStatus::Active)),
        }
    }

    fn expect_status(&self, expected: TaskStatus) -> PoolResult<()> {
        if self.status != expected {
            return Err(PoolError::invalid_state(self.id, self.status, expected));
        }
        Ok(())
    }

    /// Point-in-time copy of the observable fields
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            status: self.status,
            work_counter: self.work_counter,
            forced_stop: self.forced_stop,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a task handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub status: TaskStatus,
    pub work_counter: u64,
    pub forced_stop: bool,
    #[serde(skip)]
    pub started_at: Option<Instant>,
}

impl Display for TaskSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {} -> Counter: {} -> {}",
            self.id, self.work_counter, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new(TaskId(1));
        assert_eq!(task.id(), TaskId(1));
        assert_eq!(task.status(), TaskStatus::Initialized);
        assert_eq!(task.work_counter(), 0);
        assert!(task.started_at().is_none());
        assert!(!task.forced_stop());
        assert!(!task.cancel_handle().is_raised());
    }

    #[test]
    fn test_task_state_transitions() {
        let mut task = Task::new(TaskId(1));

        task.mark_pending().unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.started_at().is_none());

        let now = Instant::now();
        task.mark_active(now).unwrap();
        assert!(task.status().is_active());
        assert_eq!(task.started_at(), Some(now));

        task.mark_terminated().unwrap();
        assert!(task.status().is_terminated());
        assert_eq!(task.started_at(), Some(now));
    }

    #[test]
    fn test_no_back_transitions() {
        let mut task = Task::new(TaskId(2));

        let err = task.mark_active(Instant::now()).unwrap_err();
        assert!(err.is_invalid_state());
        let err = task.mark_terminated().unwrap_err();
        assert!(err.is_invalid_state());

        task.mark_pending().unwrap();
        assert!(task.mark_pending().unwrap_err().is_invalid_state());

        task.mark_terminated().unwrap();
        assert!(task.started_at().is_none());
        assert!(task.mark_pending().is_err());
        assert!(task.mark_active(Instant::now()).is_err());
        assert!(task.mark_terminated().is_err());
    }

    #[test]
    fn test_increment_fails_after_raise() {
        let mut task = Task::new(TaskId(3));
        assert_eq!(task.increment().unwrap(), 1);
        assert_eq!(task.increment().unwrap(), 2);

        task.cancel_handle().raise();
        assert!(task.increment().unwrap_err().is_cancelled());
        assert_eq!(task.work_counter(), 2);
    }

    #[test]
    fn test_first_stop_request_wins() {
        let mut task = Task::new(TaskId(4));
        assert!(task.request_stop(true));
        assert!(task.forced_stop());

        assert!(!task.request_stop(false));
        assert!(task.forced_stop());
        assert!(task.cancel_handle().is_raised());
    }

    #[test]
    fn test_snapshot_display() {
        let mut task = Task::new(TaskId(7));
        task.increment().unwrap();
        let snapshot = task.snapshot();
        assert_eq!(snapshot.to_string(), "Task 7 -> Counter: 1 -> Initialized");
    }

    #[test]
    fn test_snapshot_serialization_skips_start_time() {
        let mut task = Task::new(TaskId(5));
        task.mark_pending().unwrap();
        task.mark_active(Instant::now()).unwrap();

        let json = serde_json::to_value(task.snapshot()).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["status"], "Active");
        assert!(json.get("started_at").is_none());

        let parsed: TaskSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.id, TaskId(5));
        assert!(parsed.started_at.is_none());
    }
}
