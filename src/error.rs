//! Error types for the queue state machine.
//!
//! Mirrors the original system's numeric error-code contract so a
//! caller that needs wire compatibility can still recover the integer code
//! via [`QueueError::code`], while callers inside Rust match on the enum.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors a transition procedure can return.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Job hash absent on a transition that requires it. Code `-1`.
    #[error("job not found: {0}")]
    MissingJob(String),

    /// A token was supplied but no lock exists. Code `-2`.
    #[error("lock missing for job {0}")]
    MissingLock(String),

    /// Job not found in `active` when a transition out of `active` was
    /// requested, or not in `delayed` for `promote`. Code `-3`.
    #[error("job {0} is not active")]
    NotActive(String),

    /// Finish requested while the job still has unresolved children.
    /// Code `-4`.
    #[error("job {0} has pending dependencies")]
    PendingDependencies(String),

    /// Referenced parent job does not exist. Code `-5`.
    #[error("parent job {0} does not exist")]
    MissingParent(String),

    /// Supplied token does not own the lock. Code `-6`.
    #[error("lock token mismatch for job {0}")]
    LockMismatch(String),

    /// A user-supplied job ID begins with the reserved `"0:"` marker prefix.
    #[error("job id {0} uses the reserved marker prefix \"0:\"")]
    ReservedJobId(String),

    /// Serialization of job payload or event fields failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store reported a hard error (e.g. Redis wire/protocol
    /// failure). Never retried inside a procedure — the whole procedure is
    /// aborted and the caller may retry idempotently.
    #[error("backend error: {0}")]
    Backend(String),

    /// Redis-specific backend error, kept distinct so `?` works directly
    /// against `redis` crate calls in [`crate::backend::redis::RedisBackend`].
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis connection pool exhausted or misconfigured.
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Configuration was invalid (e.g. unparsable Redis URL).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl QueueError {
    /// The external integer error code, for callers that need
    /// to preserve wire compatibility with the original numeric contract.
    /// Returns `None` for error kinds that have no numeric counterpart
    /// (those never cross the external interface boundary as a bare code).
    pub fn code(&self) -> Option<i32> {
        match self {
            QueueError::MissingJob(_) => Some(-1),
            QueueError::MissingLock(_) => Some(-2),
            QueueError::NotActive(_) => Some(-3),
            QueueError::PendingDependencies(_) => Some(-4),
            QueueError::MissingParent(_) => Some(-5),
            QueueError::LockMismatch(_) => Some(-6),
            _ => None,
        }
    }
}
