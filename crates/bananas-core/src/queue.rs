//! The Queue Engine: the atomic operation set every backend implements.

use crate::error::JobResult;
use crate::job::{Job, JobId, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Which branch `fail` took, so callers (the Worker Pool, the Executor) can tell a job that
/// will retry apart from one that just exhausted its attempts, e.g. for dead-letter metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// `attempts <= max_retries`: scheduled for a backed-off retry.
    Retried,
    /// `attempts > max_retries`: moved to the dead-letter list with `status = failed`.
    DeadLettered,
}

/// Atomic state transitions over a central data store. A backend (Redis today) provides
/// list-append, list-pop-and-push, sorted-set add/range, and key set/get as its atomic
/// primitives; everything above this trait is backend-agnostic.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Writes the job record and prepends its id to its route's priority list. Both writes
    /// are one atomic pair.
    async fn enqueue(&self, job: Job) -> JobResult<JobId>;

    /// Writes the job record with `status = scheduled` directly into the scheduled set,
    /// scored by `at`. Used by the Client SDK's delayed submission and by the Cron
    /// Scheduler's tick (indirectly, via `Job::scheduled_for`).
    async fn enqueue_scheduled(&self, job: Job, at: DateTime<Utc>) -> JobResult<JobId>;

    /// Polls, high priority first, across the given routing keys in caller order, for a job
    /// to lease. Returns `None` if nothing appeared within the aggregate poll window.
    async fn dequeue(&self, routing_keys: &[String]) -> JobResult<Option<Job>>;

    /// Marks a job completed and drops its lease. A second call for the same id is a no-op.
    async fn complete(&self, job_id: &JobId) -> JobResult<()>;

    /// Records a failure. Retries (with exponential backoff) if attempts remain, otherwise
    /// dead-letters. The branch is a single atomic decision over the persisted `attempts`.
    async fn fail(&self, job_id: &JobId, error_message: &str) -> JobResult<FailOutcome>;

    /// Moves scheduled-set members whose score has elapsed into their route's priority
    /// list. Returns the count moved; safe to call concurrently from multiple processes.
    async fn move_scheduled_to_ready(&self) -> JobResult<u64>;

    /// Loads and deserializes a job record.
    async fn get_job(&self, job_id: &JobId) -> JobResult<Job>;

    /// Observed depth of one route's priority list. Used only for metrics sampling; not
    /// part of any queue-state invariant.
    async fn queue_depth(&self, routing_key: &str, priority: Priority) -> JobResult<u64>;

    /// Length of the dead-letter list.
    async fn dead_letter_depth(&self) -> JobResult<u64>;

    /// Length of the scheduled set.
    async fn scheduled_depth(&self) -> JobResult<u64>;

    /// Length of the processing list (jobs currently leased).
    async fn processing_depth(&self) -> JobResult<u64>;

    /// Requeues processing-list members whose lease is older than `threshold`, returning how
    /// many were recovered. Called periodically by the Worker Pool's reaper task rather than
    /// by any per-dequeue path.
    async fn reap_stale_leases(&self, threshold: std::time::Duration) -> JobResult<u64>;
}
