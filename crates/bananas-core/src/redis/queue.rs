//! Redis-backed Queue Engine: one FIFO list per (routing key, priority), a processing list,
//! a dead-letter list, and a scheduled sorted set — the canonical keyspace in full.

use super::RedisKeys;
use crate::backoff;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobStatus, Priority};
use crate::queue::{FailOutcome, JobQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};

/// Cap for the exponential retry delay; matches the Worker Pool's own backoff cap so a job
/// that keeps failing never waits longer between attempts than a stalled worker would.
const RETRY_DELAY_CAP: Duration = Duration::from_secs(3600);

pub struct RedisJobQueue {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisJobQueue {
    pub fn new(pool: Pool, key_prefix: &str) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
        }
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn load(&self, conn: &mut deadpool_redis::Connection, job_id: &JobId) -> JobResult<Job> {
        let key = self.keys.job(job_id.as_str());
        let json: Option<String> = conn.get(&key).await?;
        match json {
            Some(json) => Ok(Job::from_json(&json)?),
            None => Err(JobError::JobNotFound(job_id.to_string())),
        }
    }

    async fn persist(&self, conn: &mut deadpool_redis::Connection, job: &Job) -> JobResult<()> {
        let key = self.keys.job(job.id.as_str());
        let json = job.to_json()?;
        let _: () = conn.set(&key, json).await?;
        Ok(())
    }

    /// Tries a non-blocking move from each (priority, routing key) combination, in the
    /// caller's strict priority-then-route order. Does not block; the Worker Pool's own loop
    /// supplies the "poll repeatedly" half of the aggregate poll window.
    async fn try_dequeue_once(
        &self,
        conn: &mut deadpool_redis::Connection,
        routing_keys: &[String],
    ) -> JobResult<Option<String>> {
        let processing = self.keys.processing();
        for priority in Priority::ALL_HIGH_FIRST {
            for routing_key in routing_keys {
                let source = self.keys.route_queue(routing_key, priority);
                let moved: Option<String> = conn
                    .lmove(&source, &processing, redis::Direction::Right, redis::Direction::Left)
                    .await?;
                if let Some(id) = moved {
                    return Ok(Some(id));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, mut job: Job) -> JobResult<JobId> {
        Job::validate_routing_key(&job.routing_key)?;
        job.status = JobStatus::Pending;
        let job_id = job.id.clone();
        let key = self.keys.job(job_id.as_str());
        let list = self.keys.route_queue(&job.routing_key, job.priority);
        let json = job.to_json()?;

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(&key, json)
            .lpush(&list, job_id.as_str())
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job_id, routing_key = %job.routing_key, priority = %job.priority, "enqueued job");
        Ok(job_id)
    }

    async fn enqueue_scheduled(&self, mut job: Job, at: DateTime<Utc>) -> JobResult<JobId> {
        Job::validate_routing_key(&job.routing_key)?;
        job.status = JobStatus::Scheduled;
        job.scheduled_for = Some(at);
        let job_id = job.id.clone();
        let key = self.keys.job(job_id.as_str());
        let scheduled = self.keys.scheduled();
        let json = job.to_json()?;
        let score = at.timestamp() as f64;

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(&key, json)
            .zadd(&scheduled, job_id.as_str(), score)
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job_id, scheduled_for = %at, "enqueued scheduled job");
        Ok(job_id)
    }

    async fn dequeue(&self, routing_keys: &[String]) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let id = match self.try_dequeue_once(&mut conn, routing_keys).await? {
            Some(id) => JobId::from(id),
            None => return Ok(None),
        };

        let mut job = self.load(&mut conn, &id).await?;
        job.attempts += 1;
        job.update_status(JobStatus::Processing);
        self.persist(&mut conn, &job).await?;

        let leased_at = self.keys.processing_leased_at();
        let _: () = conn.hset(&leased_at, id.as_str(), Utc::now().timestamp()).await?;

        debug!(job_id = %id, attempt = job.attempts, "dequeued job");
        Ok(Some(job))
    }

    async fn complete(&self, job_id: &JobId) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let processing = self.keys.processing();
        let leased_at = self.keys.processing_leased_at();

        let _: () = redis::pipe()
            .atomic()
            .lrem(&processing, 0, job_id.as_str())
            .hdel(&leased_at, job_id.as_str())
            .query_async(&mut conn)
            .await?;

        if let Ok(mut job) = self.load(&mut conn, job_id).await {
            job.update_status(JobStatus::Completed);
            self.persist(&mut conn, &job).await?;
        }

        debug!(job_id = %job_id, "completed job");
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error_message: &str) -> JobResult<FailOutcome> {
        let mut conn = self.conn().await?;
        let processing = self.keys.processing();
        let leased_at = self.keys.processing_leased_at();

        let mut job = self.load(&mut conn, job_id).await?;
        job.error = Some(error_message.to_string());

        let _: () = redis::pipe()
            .atomic()
            .lrem(&processing, 0, job_id.as_str())
            .hdel(&leased_at, job_id.as_str())
            .query_async(&mut conn)
            .await?;

        if job.attempts > job.max_retries {
            job.update_status(JobStatus::Failed);
            self.persist(&mut conn, &job).await?;
            let dead = self.keys.dead();
            let _: () = conn.lpush(&dead, job_id.as_str()).await?;
            warn!(job_id = %job_id, attempts = job.attempts, "dead-lettered job");
            Ok(FailOutcome::DeadLettered)
        } else {
            let delay = backoff::exponential_seconds(job.attempts, RETRY_DELAY_CAP);
            let next_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            job.scheduled_for = Some(next_at);
            job.update_status(JobStatus::Pending);
            self.persist(&mut conn, &job).await?;

            let scheduled = self.keys.scheduled();
            let _: () = conn
                .zadd(&scheduled, job_id.as_str(), next_at.timestamp() as f64)
                .await?;
            debug!(job_id = %job_id, attempt = job.attempts, retry_at = %next_at, "scheduled retry");
            Ok(FailOutcome::Retried)
        }
    }

    async fn move_scheduled_to_ready(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let scheduled = self.keys.scheduled();
        let now = Utc::now().timestamp() as f64;

        let due: Vec<String> = conn.zrangebyscore(&scheduled, 0.0, now).await?;
        let mut moved = 0u64;

        for id in due {
            let removed: i64 = conn.zrem(&scheduled, &id).await?;
            if removed == 0 {
                // another process already claimed this member between our read and our write.
                continue;
            }

            let job_id = JobId::from(id.clone());
            let mut job = match self.load(&mut conn, &job_id).await {
                Ok(job) => job,
                Err(_) => continue,
            };
            job.scheduled_for = None;
            job.update_status(JobStatus::Pending);
            self.persist(&mut conn, &job).await?;

            let list = self.keys.route_queue(&job.routing_key, job.priority);
            let _: () = conn.lpush(&list, id.as_str()).await?;
            moved += 1;
        }

        Ok(moved)
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Job> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, job_id).await
    }

    async fn queue_depth(&self, routing_key: &str, priority: Priority) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let list = self.keys.route_queue(routing_key, priority);
        Ok(conn.llen(&list).await?)
    }

    async fn dead_letter_depth(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(&self.keys.dead()).await?)
    }

    async fn scheduled_depth(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(&self.keys.scheduled()).await?)
    }

    async fn processing_depth(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(&self.keys.processing()).await?)
    }

    async fn reap_stale_leases(&self, threshold: Duration) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let leased_at = self.keys.processing_leased_at();
        let processing = self.keys.processing();
        let now = Utc::now().timestamp();

        let leases: std::collections::HashMap<String, i64> = conn.hgetall(&leased_at).await?;
        let mut recovered = 0u64;

        for (id, leased_ts) in leases {
            if now - leased_ts < threshold.as_secs() as i64 {
                continue;
            }

            let job_id = JobId::from(id.clone());
            let job = match self.load(&mut conn, &job_id).await {
                Ok(job) => job,
                Err(_) => continue,
            };

            let removed: i64 = conn.lrem(&processing, 1, id.as_str()).await?;
            if removed == 0 {
                continue;
            }
            let _: () = conn.hdel(&leased_at, id.as_str()).await?;

            let list = self.keys.route_queue(&job.routing_key, job.priority);
            let _: () = conn.lpush(&list, id.as_str()).await?;
            warn!(job_id = %job_id, "reaped stale lease, job requeued");
            recovered += 1;
        }

        Ok(recovered)
    }
}
