//! Per-task cancellation handle
//!
//! A [`CancelHandle`] is raised at most once and observed many times. It is a
//! thin wrapper over [`tokio_util::sync::CancellationToken`]: clones share the
//! same underlying signal, so the scheduler can keep one copy while the task's
//! lifecycle future awaits another.

use tokio_util::sync::CancellationToken;

/// A one-shot, idempotent cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Create a fresh, unraised handle
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Raise the handle. Raising an already raised handle has no further effect.
    pub fn raise(&self) {
        self.token.cancel();
    }

    /// Non-blocking query of the raised state
    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the handle has been raised.
    ///
    /// Resolves immediately if it already was.
    pub async fn raised(&self) {
        self.token.cancelled().await
    }
}
