//! Task Pool - capacity-limited cancellable tasks
//!
//! An admission-control engine for long-running tasks. At most `capacity`
//! tasks are active at any time; everything else waits for a permit in the
//! order it was scheduled.
//!
//! # Overview
//!
//! Every task moves through four phases:
//! - `Initialized`: created, not yet asking for admission
//! - `Pending`: waiting for a permit from the [`AdmissionGate`]
//! - `Active`: holding a permit and doing one unit of work per `work_unit`
//! - `Terminated`: stopped; its permit, if any, went back to the gate
//!
//! Any task can be stopped through its [`CancelHandle`], and the capacity can
//! be changed while tasks run. Shrinking force-stops the longest-running
//! tasks that no longer fit.
//!
//! # Example
//!
//! ```rust
//! use task_pool::{PoolConfig, PoolEvent, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::for_testing().with_initial_capacity(2)?;
//!     let scheduler = Scheduler::new(config)?;
//!     let mut events = scheduler.subscribe();
//!
//!     let a = scheduler.create_task()?;
//!     let b = scheduler.create_task()?;
//!     let c = scheduler.create_task()?;
//!     for task in [a, b, c] {
//!         scheduler.schedule(task)?;
//!     }
//!
//!     let snapshot = scheduler.observe();
//!     assert_eq!(snapshot.active_ids(), vec![a, b]);
//!     assert_eq!(snapshot.pending_ids(), vec![c]);
//!
//!     // Stopping `a` hands its permit to `c`.
//!     scheduler.request_stop(a, false)?;
//!     loop {
//!         if events.recv().await? == (PoolEvent::TaskStarted { task_id: c }) {
//!             break;
//!         }
//!     }
//!     assert_eq!(scheduler.observe().active_ids(), vec![b, c]);
//!
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod gate;
pub mod registry;
pub mod reporter;
pub mod scheduler;
pub mod task;
pub mod types;
mod worker;

pub use cancel::CancelHandle;
pub use config::{parse_capacity, PoolConfig, CAPACITY_ENV, DEFAULT_CAPACITY};
pub use error::{ConfigError, ConfigResult, PoolError, PoolResult};
pub use gate::{AdmissionGate, AdmissionRequest, GateSnapshot, Permit};
pub use registry::TaskRegistry;
pub use reporter::{MultiReporter, NoOpReporter, PoolEvent, PoolReporter, TracingReporter};
pub use scheduler::{ResizeOutcome, Scheduler};
pub use task::{Task, TaskId, TaskSnapshot, TaskStatus};
pub use types::{PoolSnapshot, PoolStats};
