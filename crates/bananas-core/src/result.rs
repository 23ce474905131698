//! The Result Backend: write-through result records with pub/sub wake-up.

use crate::error::JobResult;
use crate::job::JobId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A finished job's short-lived summary. Named `JobOutcome` rather than `JobResult` to avoid
/// colliding with this crate's `Result<T, JobError>` alias of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// A backend for the Result Backend component. `StoreResult` and `GetResult`/`WaitForResult`
/// from the component design map onto `store`, `get`, and `wait`.
#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// Writes the outcome with a TTL chosen by its status, and publishes a wake-up
    /// notification as one pipelined transaction with the write.
    async fn store(&self, outcome: JobOutcome) -> JobResult<()>;

    /// Reads the stored outcome. Returns `None` if never stored or expired.
    async fn get(&self, job_id: &JobId) -> JobResult<Option<JobOutcome>>;

    /// Subscribes to the job's notification channel, then checks `get` to cover the race
    /// where the result landed before the subscription existed. Returns whatever `get`
    /// finds once notified or once `timeout` elapses — possibly `None` on timeout.
    async fn wait(&self, job_id: &JobId, timeout: Duration) -> JobResult<Option<JobOutcome>>;

    /// Best-effort removal; absence is not an error.
    async fn delete(&self, job_id: &JobId) -> JobResult<()>;
}
