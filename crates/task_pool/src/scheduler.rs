//! Task lifecycle orchestration
//!
//! The [`Scheduler`] owns the registry, the admission gate and the lifecycle
//! future of every scheduled task. All registry mutations, gate mutations and
//! event emissions happen under one lock, so observers always see a state in
//! which every granted permit belongs to an `Active` task and every live task
//! sits in exactly one collection.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::gate::{AdmissionGate, AdmissionRequest, Permit};
use crate::registry::TaskRegistry;
use crate::reporter::{NoOpReporter, PoolEvent, PoolReporter};
use crate::task::{TaskId, TaskSnapshot};
use crate::types::{PoolSnapshot, PoolStats};
use crate::worker;

/// Result of [`Scheduler::set_capacity`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeOutcome {
    pub previous: usize,
    pub current: usize,
    /// Pending tasks admitted by an increase, in grant order
    pub admitted: Vec<TaskId>,
    /// Active tasks force-stopped by a decrease, oldest first
    pub evicted: Vec<TaskId>,
}

/// Handle to a pool of capacity-limited, individually cancellable tasks.
///
/// Cloning is cheap; clones drive the same pool. Call
/// [`shutdown`](Self::shutdown) to stop the pool and wait for every task.
/// Dropping the last clone without it raises every handle but does not wait,
/// so lifecycle futures finish on the runtime in the background.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    _stop_on_drop: Arc<StopOnDrop>,
}

/// Held only by [`Scheduler`] clones; lifecycle futures keep `Inner` alive but
/// not this, so it drops with the last user handle.
struct StopOnDrop(Arc<Inner>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.0.begin_shutdown() {
            debug!("Last scheduler handle dropped without shutdown");
        }
    }
}

pub(crate) struct Inner {
    config: PoolConfig,
    gate: AdmissionGate,
    state: Mutex<State>,
    tracker: TaskTracker,
    runtime: Handle,
}

struct State {
    registry: TaskRegistry,
    stats: PoolStats,
    events: broadcast::Sender<PoolEvent>,
    reporter: Box<dyn PoolReporter>,
    shutting_down: bool,
}

impl State {
    fn emit(&mut self, event: PoolEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event.clone());
        self.reporter.report_event(event);
    }

    /// Move tasks the gate just granted from pending to active.
    fn activate(&mut self, granted: Vec<TaskId>, now: Instant) {
        for task_id in granted {
            match self.registry.move_to_active(task_id, now) {
                Ok(_) => {
                    let active = self.registry.active_count();
                    self.stats.record_admission(active);
                    debug!(task_id = %task_id, active, "Task admitted");
                    self.emit(PoolEvent::TaskStarted { task_id });
                }
                Err(err) => warn!(task_id = %task_id, error = %err, "Permit granted to a task that is not pending"),
            }
        }
    }

    /// Record a task leaving the registry.
    fn terminate(&mut self, task_id: TaskId, was_active: bool) {
        match self.registry.terminate(task_id) {
            Ok(task) => {
                self.stats.record_termination(was_active, task.forced_stop);
                debug!(
                    task_id = %task_id,
                    forced_stop = task.forced_stop,
                    work_counter = task.work_counter,
                    was_active,
                    "Task terminated"
                );
                self.emit(PoolEvent::TaskTerminated {
                    task_id,
                    forced_stop: task.forced_stop,
                    work_counter: task.work_counter,
                    was_active,
                });
            }
            Err(err) => warn!(task_id = %task_id, error = %err, "Failed to terminate task"),
        }
    }

    fn snapshot(&self, gate: &AdmissionGate) -> PoolSnapshot {
        PoolSnapshot {
            initialized: self.registry.initialized(),
            pending: self.registry.pending(),
            active: self.registry.active(),
            terminated: self.registry.terminated(),
            gate: gate.snapshot(),
            stats: self.stats.clone(),
        }
    }
}

impl Scheduler {
    /// Create a scheduler on the current tokio runtime
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        Self::with_reporter(config, "pool", NoOpReporter)
    }

    /// Create a scheduler that also forwards every event to `reporter`,
    /// naming the pool `context` in the reporter's output
    pub fn with_reporter<R: PoolReporter + 'static>(
        config: PoolConfig,
        context: impl Into<String>,
        mut reporter: R,
    ) -> PoolResult<Self> {
        config.validate()?;
        reporter.set_context(context.into());
        let runtime = Handle::try_current()?;
        let (events, _) = broadcast::channel(config.event_buffer_size);

        info!(
            capacity = config.initial_capacity.get(),
            work_unit = ?config.work_unit,
            "Creating task scheduler"
        );
        let inner = Arc::new(Inner {
            gate: AdmissionGate::new(config.initial_capacity),
            state: Mutex::new(State {
                registry: TaskRegistry::new(config.terminated_history),
                stats: PoolStats::default(),
                events,
                reporter: Box::new(reporter),
                shutting_down: false,
            }),
            tracker: TaskTracker::new(),
            runtime,
            config,
        });
        Ok(Self {
            _stop_on_drop: Arc::new(StopOnDrop(inner.clone())),
            inner,
        })
    }

    /// Get the configuration the scheduler was built with
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Allocate a new task in `Initialized`
    pub fn create_task(&self) -> PoolResult<TaskId> {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(PoolError::Shutdown);
        }
        let task_id = state.registry.create();
        state.stats.created += 1;
        debug!(task_id = %task_id, "Task created");
        state.emit(PoolEvent::TaskCreated { task_id });
        Ok(task_id)
    }

    /// Move an `Initialized` task to `Pending` and request a permit for it.
    ///
    /// If a permit is free the task is already `Active` when this returns.
    pub fn schedule(&self, task_id: TaskId) -> PoolResult<()> {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(PoolError::Shutdown);
        }

        let cancel = state
            .registry
            .move_to_pending(task_id)?
            .cancel_handle()
            .clone();
        state.stats.scheduled += 1;
        debug!(task_id = %task_id, "Task scheduled");
        state.emit(PoolEvent::TaskScheduled { task_id });

        if cancel.is_raised() {
            // Stopped before it was scheduled: the admission request fails at once.
            state.terminate(task_id, false);
            return Ok(());
        }

        let (request, granted) = self.inner.gate.request(task_id);
        state.activate(granted, Instant::now());

        self.inner.tracker.spawn_on(
            worker::run(self.inner.clone(), task_id, request, cancel),
            &self.inner.runtime,
        );
        Ok(())
    }

    /// Raise a task's cancellation handle.
    ///
    /// `forced` is recorded on the task. Stopping a terminated task, or one
    /// that was already asked to stop, changes nothing.
    pub fn request_stop(&self, task_id: TaskId, forced: bool) -> PoolResult<()> {
        let mut state = self.inner.state.lock();
        if !state.registry.is_known(task_id) {
            return Err(PoolError::NotFound(task_id));
        }

        let raised = match state.registry.get_mut(task_id) {
            Some(task) => task.request_stop(forced),
            None => return Ok(()),
        };
        if raised {
            debug!(task_id = %task_id, forced, "Stop requested");
            state.emit(PoolEvent::StopRequested { task_id, forced });
        }
        Ok(())
    }

    /// Change how many tasks may be active at once.
    ///
    /// Growing admits waiting tasks in request order. Shrinking force-stops
    /// the longest-running active tasks until the remaining ones fit; pending
    /// tasks keep waiting.
    pub fn set_capacity(&self, capacity: usize) -> PoolResult<ResizeOutcome> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            PoolError::invalid_argument(format!("capacity must be positive, got {capacity}"))
        })?;

        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(PoolError::Shutdown);
        }

        let previous = self.inner.gate.capacity();
        let current = capacity.get();
        if current == previous {
            return Ok(ResizeOutcome {
                previous,
                current,
                admitted: Vec::new(),
                evicted: Vec::new(),
            });
        }

        let change = self.inner.gate.set_capacity(capacity);
        let admitted = change.granted.clone();

        let mut evicted = Vec::new();
        if current < previous {
            // Tasks already on their way out count towards the excess.
            let mut candidates = Vec::new();
            let mut departing = 0;
            for task_id in state.registry.active_by_start() {
                match state.registry.get(task_id) {
                    Some(task) if task.cancel_handle().is_raised() => departing += 1,
                    Some(_) => candidates.push(task_id),
                    None => {}
                }
            }
            let excess = state
                .registry
                .active_count()
                .saturating_sub(current + departing);
            for task_id in candidates.into_iter().take(excess) {
                if let Some(task) = state.registry.get_mut(task_id) {
                    task.request_stop(true);
                    evicted.push(task_id);
                }
            }
        }

        info!(
            previous,
            current,
            admitted = admitted.len(),
            evicted = evicted.len(),
            "Capacity changed"
        );
        state.emit(PoolEvent::CapacityChanged {
            previous,
            current,
            evicted: evicted.clone(),
        });
        for task_id in &evicted {
            state.emit(PoolEvent::StopRequested {
                task_id: *task_id,
                forced: true,
            });
        }
        state.activate(change.granted, Instant::now());

        Ok(ResizeOutcome {
            previous,
            current,
            admitted,
            evicted,
        })
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.inner.gate.capacity()
    }

    /// Consistent snapshot of every collection, the gate and the statistics
    pub fn observe(&self) -> PoolSnapshot {
        self.inner.state.lock().snapshot(&self.inner.gate)
    }

    /// Subscribe to lifecycle events emitted from now on.
    ///
    /// A subscriber that falls more than `event_buffer_size` events behind
    /// receives `RecvError::Lagged` and should re-read [`observe`](Self::observe).
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.state.lock().events.subscribe()
    }

    /// Take a snapshot and subscribe in one step, so that the receiver yields
    /// exactly the events that happen after the snapshot.
    pub fn observe_and_subscribe(&self) -> (PoolSnapshot, broadcast::Receiver<PoolEvent>) {
        let state = self.inner.state.lock();
        (state.snapshot(&self.inner.gate), state.events.subscribe())
    }

    /// Look up one task, including recently terminated ones
    pub fn task(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.inner.state.lock().registry.snapshot_of(task_id)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats.clone()
    }

    /// Stop every task and wait for all lifecycle futures to finish.
    ///
    /// Afterwards no tasks can be created or scheduled and the capacity is
    /// frozen. Tasks that were never scheduled have their handles raised but
    /// stay listed as `Initialized`, since they can no longer be scheduled.
    pub async fn shutdown(&self) {
        let first = self.inner.begin_shutdown();

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        if first {
            self.inner.state.lock().reporter.finish();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}

impl Inner {
    /// Refuse new work and raise every live handle. Returns `false` if the
    /// pool was already shutting down.
    fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutting_down {
            return false;
        }
        state.shutting_down = true;
        let mut stopped = 0usize;
        for task in state.registry.live_tasks_mut() {
            if task.request_stop(false) {
                stopped += 1;
            }
        }
        info!(stopped, "Shutting down task scheduler");
        state.emit(PoolEvent::ShutdownStarted);
        true
    }

    pub(crate) fn work_unit(&self) -> std::time::Duration {
        self.config.work_unit
    }

    /// Give up a pending task's admission request after its handle was raised.
    ///
    /// Returns the permit if the grant won the race; the task is then already
    /// active and must run its exit path.
    pub(crate) fn abandon_admission(
        &self,
        task_id: TaskId,
        request: AdmissionRequest,
    ) -> Option<Permit> {
        let mut state = self.state.lock();
        match self.gate.withdraw(request) {
            Some(permit) => Some(permit),
            None => {
                state.terminate(task_id, false);
                None
            }
        }
    }

    /// Count one unit of work. Fails once the task's handle is raised.
    pub(crate) fn record_progress(&self, task_id: TaskId) -> PoolResult<u64> {
        let mut state = self.state.lock();
        let work_counter = state
            .registry
            .get_mut(task_id)
            .ok_or(PoolError::NotFound(task_id))?
            .increment()?;
        state.emit(PoolEvent::TaskProgress {
            task_id,
            work_counter,
        });
        Ok(work_counter)
    }

    /// Exit path of an active task: release its permit, drop it from the
    /// registry and admit whoever the permit went to, in one step.
    pub(crate) fn finish_active(&self, task_id: TaskId, permit: Permit) {
        let mut state = self.state.lock();
        let granted = self.gate.release(permit);
        state.terminate(task_id, true);
        state.activate(granted, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn scheduler(capacity: usize) -> Scheduler {
        let config = PoolConfig::for_testing()
            .with_initial_capacity(capacity)
            .unwrap();
        Scheduler::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_activates_within_the_call() {
        let scheduler = scheduler(1);
        let a = scheduler.create_task().unwrap();
        let b = scheduler.create_task().unwrap();
        assert_eq!(a, TaskId(1));
        assert_eq!(b, TaskId(2));

        scheduler.schedule(a).unwrap();
        scheduler.schedule(b).unwrap();

        // Nothing has been polled yet, but the grant already moved `a`.
        let snapshot = scheduler.observe();
        assert_eq!(snapshot.active_ids(), vec![a]);
        assert_eq!(snapshot.pending_ids(), vec![b]);
        assert_eq!(snapshot.gate.issued, 1);
        assert_eq!(snapshot.gate.waiting, 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_after_grant_terminates_as_active() {
        let scheduler = scheduler(1);
        let mut events = scheduler.subscribe();
        let a = scheduler.create_task().unwrap();
        scheduler.schedule(a).unwrap();
        scheduler.request_stop(a, true).unwrap();

        loop {
            if let PoolEvent::TaskTerminated {
                task_id,
                was_active,
                forced_stop,
                work_counter,
            } = events.recv().await.unwrap()
            {
                assert_eq!(task_id, a);
                assert!(was_active);
                assert!(forced_stop);
                assert_eq!(work_counter, 0);
                break;
            }
        }

        let snapshot = scheduler.observe();
        assert_eq!(snapshot.gate.available, 1);
        assert_eq!(snapshot.stats.forced_stops, 1);
        assert_eq!(scheduler.task(a).unwrap().status, TaskStatus::Terminated);
    }

    #[tokio::test]
    async fn test_abandon_queued_request() {
        let scheduler = scheduler(1);
        let a = scheduler.create_task().unwrap();
        scheduler.schedule(a).unwrap();

        let inner = &scheduler.inner;
        let b = inner.state.lock().registry.create();
        inner.state.lock().registry.move_to_pending(b).unwrap();
        let (request, granted) = inner.gate.request(b);
        assert!(granted.is_empty());

        assert!(inner.abandon_admission(b, request).is_none());
        assert_eq!(inner.gate.snapshot().waiting, 0);
        assert_eq!(
            inner.state.lock().registry.status(b),
            Some(TaskStatus::Terminated)
        );
        assert_eq!(scheduler.stats().cancelled_while_pending, 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_stops_once_raised() {
        let scheduler = scheduler(1);
        let a = scheduler.create_task().unwrap();
        scheduler.schedule(a).unwrap();

        assert_eq!(scheduler.inner.record_progress(a).unwrap(), 1);
        scheduler.request_stop(a, false).unwrap();
        assert!(scheduler.inner.record_progress(a).unwrap_err().is_cancelled());
        assert!(scheduler
            .inner
            .record_progress(TaskId(7))
            .unwrap_err()
            .is_not_found());

        scheduler.shutdown().await;
    }
}
