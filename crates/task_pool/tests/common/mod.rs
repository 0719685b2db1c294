#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use task_pool::{PoolConfig, PoolEvent, PoolSnapshot, Scheduler, TaskId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Install a test-friendly subscriber once per test binary
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A scheduler with a short work unit and the given capacity
pub fn scheduler(capacity: usize) -> Scheduler {
    init_test_logging();
    let config = PoolConfig::for_testing()
        .with_initial_capacity(capacity)
        .unwrap();
    Scheduler::new(config).unwrap()
}

/// Create and schedule `count` tasks in order
pub fn schedule_many(scheduler: &Scheduler, count: usize) -> Vec<TaskId> {
    (0..count)
        .map(|_| {
            let id = scheduler.create_task().unwrap();
            scheduler.schedule(id).unwrap();
            id
        })
        .collect()
}

/// Receive events until one matches, panicking after a generous timeout
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<PoolEvent>,
    mut matches: impl FnMut(&PoolEvent) -> bool,
) -> PoolEvent {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(WAIT_LIMIT, wait)
        .await
        .expect("timed out waiting for event")
}

/// Wait for a task to reach `Terminated`
pub async fn wait_terminated(events: &mut broadcast::Receiver<PoolEvent>, task_id: TaskId) {
    wait_for_event(events, |event| {
        matches!(event, PoolEvent::TaskTerminated { task_id: id, .. } if *id == task_id)
    })
    .await;
}

/// Poll snapshots until `condition` holds
pub async fn wait_until(
    scheduler: &Scheduler,
    mut condition: impl FnMut(&PoolSnapshot) -> bool,
) -> PoolSnapshot {
    let wait = async {
        loop {
            let snapshot = scheduler.observe();
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, wait)
        .await
        .expect("timed out waiting for pool state")
}

/// Drain whatever is already buffered
pub fn drain(events: &mut broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
