//! Configuration for the task pool

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Capacity used when none is configured or the configured value is unusable.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(3) {
    Some(capacity) => capacity,
    None => panic!("default capacity must be non-zero"),
};

/// Environment variable consulted by [`PoolConfig::from_env`].
pub const CAPACITY_ENV: &str = "TASK_POOL_CAPACITY";

/// Parse a user-supplied capacity.
///
/// Anything that is not a positive integer (missing, empty, garbage, zero or
/// negative) yields [`DEFAULT_CAPACITY`].
pub fn parse_capacity(input: Option<&str>) -> NonZeroUsize {
    input
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .and_then(NonZeroUsize::new)
        .unwrap_or(DEFAULT_CAPACITY)
}

/// Configuration for the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of simultaneously active tasks at startup
    pub initial_capacity: NonZeroUsize,

    /// Length of one unit of simulated work
    pub work_unit: Duration,

    /// Capacity of the broadcast channel carrying lifecycle events
    pub event_buffer_size: usize,

    /// How many terminated tasks are remembered for observers (0 keeps none)
    pub terminated_history: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            work_unit: Duration::from_secs(1),
            event_buffer_size: 1024,
            terminated_history: 256,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let raw = std::env::var(CAPACITY_ENV).ok();
        Self {
            initial_capacity: parse_capacity(raw.as_deref()),
            ..Self::default()
        }
    }

    /// Set the initial capacity
    pub fn with_initial_capacity(mut self, capacity: usize) -> ConfigResult<Self> {
        self.initial_capacity =
            NonZeroUsize::new(capacity).ok_or_else(|| ConfigError::invalid_capacity(capacity))?;
        Ok(self)
    }

    /// Set the duration of one work unit
    pub fn with_work_unit(mut self, work_unit: Duration) -> ConfigResult<Self> {
        if work_unit.is_zero() {
            return Err(ConfigError::invalid_work_unit(work_unit));
        }
        self.work_unit = work_unit;
        Ok(self)
    }

    /// Set the event channel capacity
    pub fn with_event_buffer_size(mut self, size: usize) -> ConfigResult<Self> {
        if size == 0 {
            return Err(ConfigError::invalid_event_buffer(size));
        }
        self.event_buffer_size = size;
        Ok(self)
    }

    /// Set how many terminated tasks stay observable
    pub fn with_terminated_history(mut self, history: usize) -> Self {
        self.terminated_history = history;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.work_unit.is_zero() {
            return Err(ConfigError::invalid_work_unit(self.work_unit));
        }

        if self.event_buffer_size == 0 {
            return Err(ConfigError::invalid_event_buffer(self.event_buffer_size));
        }

        Ok(())
    }

    /// Create a configuration with a short work unit, suited to tests
    pub fn for_testing() -> Self {
        Self {
            work_unit: Duration::from_millis(10),
            event_buffer_size: 4096,
            ..Self::default()
        }
    }
}
