//! Walk through the lifecycle of a small pool while resizing it
//!
//! Reads the starting capacity from `TASK_POOL_CAPACITY` (default 3), runs a
//! handful of tasks, grows the pool, shrinks it again and prints the state
//! after each step. Set `RUST_LOG=task_pool=debug` to see the scheduler's own
//! log lines.

use std::time::Duration;

use task_pool::{PoolConfig, PoolSnapshot, Scheduler, TracingReporter};
use tracing_subscriber::EnvFilter;

fn print_state(step: &str, snapshot: &PoolSnapshot) {
    println!("== {step}");
    println!(
        "   capacity {} | available {} | owed {}",
        snapshot.gate.capacity, snapshot.gate.available, snapshot.gate.pending_reduction
    );
    for task in snapshot
        .initialized
        .iter()
        .chain(&snapshot.pending)
        .chain(&snapshot.active)
    {
        println!("   {task}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PoolConfig::from_env().with_work_unit(Duration::from_millis(200))?;
    let scheduler = Scheduler::with_reporter(config, "walkthrough", TracingReporter::new())?;

    let capacity = scheduler.capacity();
    for _ in 0..capacity + 2 {
        let id = scheduler.create_task()?;
        scheduler.schedule(id)?;
    }
    print_state("scheduled", &scheduler.observe());

    tokio::time::sleep(Duration::from_millis(650)).await;
    print_state("after some work", &scheduler.observe());

    let outcome = scheduler.set_capacity(capacity + 2)?;
    println!("grew to {}, admitted {:?}", outcome.current, outcome.admitted);
    tokio::time::sleep(Duration::from_millis(450)).await;
    print_state("after growing", &scheduler.observe());

    let outcome = scheduler.set_capacity(1)?;
    println!("shrank to {}, evicted {:?}", outcome.current, outcome.evicted);
    tokio::time::sleep(Duration::from_millis(100)).await;
    print_state("after shrinking", &scheduler.observe());

    scheduler.shutdown().await;
    let stats = scheduler.stats();
    println!(
        "done: {} completed, {} forced, peak {} active",
        stats.completed, stats.forced_stops, stats.peak_active
    );
    Ok(())
}
