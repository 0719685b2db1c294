//! Lifecycle change notification
//!
//! The scheduler emits a [`PoolEvent`] for every observable change. Events
//! reach observers through [`Scheduler::subscribe`](crate::Scheduler::subscribe)
//! and through an optional [`PoolReporter`] installed at construction.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::task::TaskId;

/// Event types emitted by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolEvent {
    /// A task was created in `Initialized`
    TaskCreated { task_id: TaskId },
    /// A task moved to `Pending` and asked for a permit
    TaskScheduled { task_id: TaskId },
    /// A task was granted a permit and became `Active`
    TaskStarted { task_id: TaskId },
    /// An active task completed a unit of work
    TaskProgress { task_id: TaskId, work_counter: u64 },
    /// A task's cancellation handle was raised
    StopRequested { task_id: TaskId, forced: bool },
    /// A task reached `Terminated`
    TaskTerminated {
        task_id: TaskId,
        forced_stop: bool,
        work_counter: u64,
        /// False if the task never got a permit
        was_active: bool,
    },
    /// The pool capacity changed
    CapacityChanged {
        previous: usize,
        current: usize,
        /// Active tasks force-stopped by a decrease, oldest first
        evicted: Vec<TaskId>,
    },
    /// Shutdown began; every live task has been asked to stop
    ShutdownStarted,
}

impl PoolEvent {
    /// The task this event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            PoolEvent::TaskCreated { task_id }
            | PoolEvent::TaskScheduled { task_id }
            | PoolEvent::TaskStarted { task_id }
            | PoolEvent::TaskProgress { task_id, .. }
            | PoolEvent::StopRequested { task_id, .. }
            | PoolEvent::TaskTerminated { task_id, .. } => Some(*task_id),
            PoolEvent::CapacityChanged { .. } | PoolEvent::ShutdownStarted => None,
        }
    }
}

/// Trait for consuming pool events.
///
/// Called while the scheduler holds its registry lock, so implementations
/// must be quick and must not call back into the scheduler.
pub trait PoolReporter: Send {
    /// Report a pool event
    fn report_event(&mut self, event: PoolEvent);

    /// Set context for the reporter, e.g. the name of the pool
    fn set_context(&mut self, context: String) {
        let _ = context;
    }

    /// Called when the scheduler shuts down
    fn finish(&mut self) {}
}

/// A no-op reporter that discards all events
#[derive(Debug, Default)]
pub struct NoOpReporter;

impl PoolReporter for NoOpReporter {
    fn report_event(&mut self, _event: PoolEvent) {}
}

/// A reporter that turns events into `tracing` log lines
#[derive(Debug, Default)]
pub struct TracingReporter {
    context: Option<String>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self { context: None }
    }
}

impl PoolReporter for TracingReporter {
    fn report_event(&mut self, event: PoolEvent) {
        let pool = self.context.as_deref().unwrap_or("pool");
        match event {
            PoolEvent::TaskCreated { task_id } => {
                debug!(pool, task_id = %task_id, "Task created");
            }
            PoolEvent::TaskScheduled { task_id } => {
                debug!(pool, task_id = %task_id, "Task waiting for a permit");
            }
            PoolEvent::TaskStarted { task_id } => {
                info!(pool, task_id = %task_id, "Task started");
            }
            PoolEvent::TaskProgress {
                task_id,
                work_counter,
            } => {
                trace!(pool, task_id = %task_id, work_counter, "Task progress");
            }
            PoolEvent::StopRequested { task_id, forced } => {
                debug!(pool, task_id = %task_id, forced, "Stop requested");
            }
            PoolEvent::TaskTerminated {
                task_id,
                forced_stop,
                work_counter,
                was_active,
            } => {
                info!(
                    pool,
                    task_id = %task_id,
                    forced_stop,
                    work_counter,
                    was_active,
                    "Task terminated"
                );
            }
            PoolEvent::CapacityChanged {
                previous,
                current,
                evicted,
            } => {
                info!(pool, previous, current, evicted = ?evicted, "Capacity changed");
            }
            PoolEvent::ShutdownStarted => {
                info!(pool, "Shutting down");
            }
        }
    }

    fn set_context(&mut self, context: String) {
        self.context = Some(context);
    }
}

/// A reporter that forwards events to several reporters
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn PoolReporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter; events reach reporters in the order they were added
    pub fn with_reporter<R: PoolReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl PoolReporter for MultiReporter {
    fn report_event(&mut self, event: PoolEvent) {
        for reporter in &mut self.reporters {
            reporter.report_event(event.clone());
        }
    }

    fn set_context(&mut self, context: String) {
        for reporter in &mut self.reporters {
            reporter.set_context(context.clone());
        }
    }

    fn finish(&mut self) {
        for reporter in &mut self.reporters {
            reporter.finish();
        }
    }
}
