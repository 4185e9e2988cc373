//! The error taxonomy returned on every conductor/controller reply (§6, §7).

use thiserror::Error;

/// Flat error taxonomy shared by every request/reply pair in the workspace.
///
/// Every server reply carries one of these instead of panicking; callers
/// propagate with `?` or recover (backoff, deadlock-exclusion retry, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MarklinError {
    /// Request payload failed validation (out-of-range id, bad direction, …).
    #[error("invalid argument")]
    InvalidArgument,
    /// The named resource (sensor, switch, block, node, train) does not exist.
    #[error("not found")]
    NotFound,
    /// The caller does not own the resource it tried to mutate or release.
    #[error("not owner")]
    NotOwner,
    /// The resource is already reserved by another train.
    #[error("already reserved")]
    AlreadyReserved,
    /// Path-finding found no route under the current constraints.
    #[error("no path")]
    NoPath,
    /// A bounded queue (scheduler heap, pub/sub ring) is full.
    #[error("queue full")]
    QueueFull,
    /// The underlying channel/thread could not be reached.
    #[error("communication failure")]
    Communication,
    /// The server has not finished initializing.
    #[error("not initialized")]
    NotInitialized,
    /// The operation is still in progress (e.g. a path-find retry backoff).
    #[error("pending")]
    Pending,
    /// Catch-all for conditions with no closer match.
    #[error("unknown error")]
    Unknown,
}

/// Convenience alias used throughout the workspace's request handlers.
pub type MarklinResult<T> = Result<T, MarklinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_stable() {
        assert_eq!(MarklinError::NoPath.to_string(), "no path");
        assert_eq!(MarklinError::QueueFull.to_string(), "queue full");
    }
}
