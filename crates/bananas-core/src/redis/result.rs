//! Redis-backed Result Backend: a per-job hash plus a pub/sub wake-up channel.

use super::RedisKeys;
use crate::config::ResultSettings;
use crate::error::{JobError, JobResult};
use crate::job::JobId;
use crate::result::{JobOutcome, OutcomeStatus, ResultBackend};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool;
use futures::StreamExt;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub struct RedisResultBackend {
    pool: Pool,
    keys: RedisKeys,
    settings: ResultSettings,
    /// Kept alongside the pool so `wait` can open a dedicated pub/sub connection; pooled
    /// connections can't be put into subscriber mode without leaving the pool unusable.
    redis_url: String,
}

impl RedisResultBackend {
    pub fn new(pool: Pool, redis_url: impl Into<String>, key_prefix: &str, settings: ResultSettings) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            settings,
            redis_url: redis_url.into(),
        }
    }

    fn ttl_for(&self, status: OutcomeStatus) -> u64 {
        match status {
            OutcomeStatus::Completed => self.settings.ttl_success_secs,
            OutcomeStatus::Failed => self.settings.ttl_failure_secs,
        }
    }
}

#[async_trait]
impl ResultBackend for RedisResultBackend {
    async fn store(&self, outcome: JobOutcome) -> JobResult<()> {
        if !self.settings.enabled {
            return Ok(());
        }

        let key = self.keys.result(outcome.job_id.as_str());
        let channel = self.keys.result_notify(outcome.job_id.as_str());
        let ttl = self.ttl_for(outcome.status);

        let status_str = match outcome.status {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Failed => "failed",
        };

        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&key, "status", status_str)
            .ignore()
            .hset(&key, "completed_at", outcome.completed_at.to_rfc3339())
            .ignore()
            .hset(&key, "duration_ms", outcome.duration.as_millis() as u64)
            .ignore();
        if let Some(result) = &outcome.result {
            pipe.hset(&key, "result", result).ignore();
        }
        match &outcome.error {
            Some(error) => {
                pipe.hset(&key, "error", error).ignore();
            }
            None => {
                // A success overwriting an earlier failed attempt's record must not leave
                // that attempt's error field behind.
                pipe.hdel(&key, "error").ignore();
            }
        }
        pipe.expire(&key, ttl as i64).ignore();
        pipe.publish(&channel, "done").ignore();
        pipe.query_async::<()>(&mut conn).await?;

        debug!(job_id = %outcome.job_id, status = status_str, "stored job result");
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> JobResult<Option<JobOutcome>> {
        let mut conn = self.pool.get().await?;
        let key = self.keys.result(job_id.as_str());
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_outcome(job_id, &fields).map(Some)
    }

    async fn wait(&self, job_id: &JobId, timeout: Duration) -> JobResult<Option<JobOutcome>> {
        if let Some(existing) = self.get(job_id).await? {
            return Ok(Some(existing));
        }

        let channel = self.keys.result_notify(job_id.as_str());
        let client = redis::Client::open(self.redis_url.as_str()).map_err(JobError::Redis)?;
        let conn = client.get_async_pubsub().await.map_err(JobError::Redis)?;
        let (mut sink, mut stream) = conn.split();
        sink.subscribe(&channel).await.map_err(JobError::Redis)?;

        // A result may have landed between the initial `get` and the subscription above;
        // check once more now that we're listening.
        if let Some(existing) = self.get(job_id).await? {
            return Ok(Some(existing));
        }

        let wait_for_message = stream.next();
        match tokio::time::timeout(timeout, wait_for_message).await {
            Ok(Some(_msg)) => self.get(job_id).await,
            Ok(None) | Err(_) => self.get(job_id).await,
        }
    }

    async fn delete(&self, job_id: &JobId) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let key = self.keys.result(job_id.as_str());
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}

fn parse_outcome(job_id: &JobId, fields: &HashMap<String, String>) -> JobResult<JobOutcome> {
    let status = match fields.get("status").map(String::as_str) {
        Some("completed") => OutcomeStatus::Completed,
        Some("failed") => OutcomeStatus::Failed,
        other => {
            return Err(JobError::Internal(format!(
                "result record for {job_id} has unrecognized status {other:?}"
            )))
        }
    };
    let completed_at = fields
        .get("completed_at")
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let duration_ms: u64 = fields
        .get("duration_ms")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(JobOutcome {
        job_id: job_id.clone(),
        status,
        result: fields.get("result").cloned(),
        error: fields.get("error").cloned(),
        completed_at,
        duration: Duration::from_millis(duration_ms),
    })
}
