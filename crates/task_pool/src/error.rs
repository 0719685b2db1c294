//! Error types for the task pool

use std::time::Duration;

use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

/// Main error type for pool operations
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Task {task_id} is {actual}, expected {expected}")]
    InvalidState {
        task_id: TaskId,
        actual: TaskStatus,
        expected: TaskStatus,
    },

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Unwinds a suspended wait or admission request. Never returned from the
    /// public scheduler operations.
    #[error("Cancelled")]
    Cancelled,

    #[error("Scheduler is shut down")]
    Shutdown,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Errors related to configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid capacity: {value} (must be > 0)")]
    InvalidCapacity { value: usize },

    #[error("Invalid work unit duration: {duration:?} (must be > 0)")]
    InvalidWorkUnit { duration: Duration },

    #[error("Invalid event buffer size: {size} (must be > 0)")]
    InvalidEventBuffer { size: usize },
}

/// Result type alias for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl PoolError {
    /// Create an invalid state error
    pub fn invalid_state(task_id: TaskId, actual: TaskStatus, expected: TaskStatus) -> Self {
        PoolError::InvalidState {
            task_id,
            actual,
            expected,
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(reason: S) -> Self {
        PoolError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Check if this error indicates cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PoolError::Cancelled)
    }

    /// Check if this error indicates an unknown task id
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound(_))
    }

    /// Check if this error indicates an operation invalid for the task's phase
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, PoolError::InvalidState { .. })
    }

    /// Check if this error indicates a rejected argument
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, PoolError::InvalidArgument { .. })
    }
}

impl ConfigError {
    /// Create an invalid capacity error
    pub fn invalid_capacity(value: usize) -> Self {
        ConfigError::InvalidCapacity { value }
    }

    /// Create an invalid work unit error
    pub fn invalid_work_unit(duration: Duration) -> Self {
        ConfigError::InvalidWorkUnit { duration }
    }

    /// Create an invalid event buffer error
    pub fn invalid_event_buffer(size: usize) -> Self {
        ConfigError::InvalidEventBuffer { size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let invalid = PoolError::invalid_state(TaskId(4), TaskStatus::Pending, TaskStatus::Initialized);
        assert!(invalid.is_invalid_state());
        assert_eq!(invalid.to_string(), "Task 4 is Pending, expected Initialized");

        let missing = PoolError::NotFound(TaskId(9));
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "Task 9 not found");

        let argument = PoolError::invalid_argument("capacity must be positive");
        assert!(argument.is_invalid_argument());
        assert_eq!(argument.to_string(), "Invalid argument: capacity must be positive");
    }

    #[test]
    fn test_error_helpers() {
        let cancelled = PoolError::Cancelled;
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_not_found());
        assert!(!cancelled.is_invalid_state());

        let shutdown = PoolError::Shutdown;
        assert!(!shutdown.is_cancelled());
        assert!(!shutdown.is_invalid_argument());
    }

    #[test]
    fn test_config_error_conversion() {
        let error: PoolError = ConfigError::invalid_capacity(0).into();
        assert!(matches!(
            error,
            PoolError::Config(ConfigError::InvalidCapacity { value: 0 })
        ));

        let work_unit = ConfigError::invalid_work_unit(Duration::ZERO);
        if let ConfigError::InvalidWorkUnit { duration } = work_unit {
            assert_eq!(duration, Duration::ZERO);
        } else {
            panic!("Expected invalid work unit error");
        }

        let buffer = ConfigError::invalid_event_buffer(0);
        assert_eq!(buffer.to_string(), "Invalid event buffer size: 0 (must be > 0)");
    }
}
