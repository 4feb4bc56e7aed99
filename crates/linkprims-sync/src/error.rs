use std::fmt;

/// Errors returned by the blocking primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A container was created with zero capacity.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    /// The wait deadline passed before the condition was met.
    #[error("wait timed out")]
    TimedOut,

    /// The wait was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("wait cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A blocking push that did not complete. The rejected element is handed back.
pub struct PushError<T> {
    pub value: T,
    pub reason: SyncError,
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push failed: {}", self.reason)
    }
}

impl<T> std::error::Error for PushError<T> {}
