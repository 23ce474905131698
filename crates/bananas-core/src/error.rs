//! Error taxonomy for the job queue.

use thiserror::Error;

/// Result type for job-queue operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors surfaced by the coordination layer.
#[derive(Debug, Error)]
pub enum JobError {
    /// Configuration failed validation at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The data store could not be reached or returned an I/O-level error.
    #[error("data store unavailable: {0}")]
    DataStoreUnavailable(String),

    /// Redis returned an error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The connection pool could not hand out a connection.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Serialization or deserialization of a stored record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lookup by id found nothing. Not an execution failure.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A result lookup found nothing (never stored, or TTL elapsed).
    #[error("result not found: {0}")]
    ResultNotFound(String),

    /// No handler is registered for a job's name.
    #[error("no handler registered for job name: {0}")]
    NoHandler(String),

    /// `routing_key` failed validation.
    #[error("invalid routing key: {0}")]
    InvalidRoutingKey(String),

    /// A cron expression failed to parse.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// An IANA timezone name was not recognized.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A schedule id failed validation.
    #[error("invalid schedule id: {0}")]
    InvalidScheduleId(String),

    /// A schedule was registered twice under the same id.
    #[error("duplicate schedule id: {0}")]
    DuplicateScheduleId(String),

    /// A handler exceeded its execution deadline.
    #[error("job timed out after {0:?}")]
    JobTimeout(std::time::Duration),

    /// A handler panicked; the panic payload and a best-effort trace are captured.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// A distributed lock (schedule lock or similar) was not acquired this attempt.
    #[error("lock not acquired: {0}")]
    LockNotAcquired(String),

    /// Catch-all for conditions with no dedicated variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Whether the Worker Pool should back off and retry the operation that produced this
    /// error, as opposed to surfacing it to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            JobError::DataStoreUnavailable(_) | JobError::Redis(_) | JobError::Pool(_)
        )
    }
}
