//! Redis-backed implementations of the Queue Engine and Result Backend, and the canonical
//! keyspace both are built on.

mod queue;
mod result;
mod schedule;

pub use queue::RedisJobQueue;
pub use result::RedisResultBackend;
pub use schedule::RedisScheduleStore;

use crate::config::RedisSettings;
use crate::error::{JobError, JobResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Builds and health-checks a connection pool from the resolved Redis settings.
pub async fn create_pool(settings: &RedisSettings) -> JobResult<Pool> {
    info!(url = %settings.url, "connecting to Redis");

    let cfg = Config::from_url(&settings.url);
    let pool = cfg
        .builder()
        .map_err(|e| JobError::ConfigInvalid(format!("invalid redis url: {e}")))?
        .max_size(settings.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::ConfigInvalid(format!("failed to build redis pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("redis connection pool ready");
    Ok(pool)
}

/// Builds the canonical `bananas:` keyspace.
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{job_id}", self.prefix)
    }

    /// One FIFO list per (routing key, priority).
    pub fn route_queue(&self, routing_key: &str, priority: crate::job::Priority) -> String {
        format!("{}:route:{routing_key}:queue:{}", self.prefix, priority.as_str())
    }

    pub fn processing(&self) -> String {
        format!("{}:queue:processing", self.prefix)
    }

    pub fn dead(&self) -> String {
        format!("{}:queue:dead", self.prefix)
    }

    pub fn scheduled(&self) -> String {
        format!("{}:queue:scheduled", self.prefix)
    }

    /// Hash tracking when each processing-list member was leased, for the reaper.
    pub fn processing_leased_at(&self) -> String {
        format!("{}:queue:processing:leased_at", self.prefix)
    }

    pub fn result(&self, job_id: &str) -> String {
        format!("{}:result:{job_id}", self.prefix)
    }

    pub fn result_notify(&self, job_id: &str) -> String {
        format!("{}:result:notify:{job_id}", self.prefix)
    }

    pub fn schedule(&self, schedule_id: &str) -> String {
        format!("{}:schedules:{schedule_id}", self.prefix)
    }

    pub fn schedule_lock(&self, schedule_id: &str) -> String {
        format!("{}:schedule_lock:{schedule_id}", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("bananas")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Priority;

    #[test]
    fn keys_use_the_configured_prefix() {
        let keys = RedisKeys::new("test");
        assert_eq!(keys.job("abc"), "test:job:abc");
        assert_eq!(keys.route_queue("gpu", Priority::High), "test:route:gpu:queue:high");
        assert_eq!(keys.processing(), "test:queue:processing");
        assert_eq!(keys.dead(), "test:queue:dead");
        assert_eq!(keys.scheduled(), "test:queue:scheduled");
        assert_eq!(keys.result("abc"), "test:result:abc");
        assert_eq!(keys.result_notify("abc"), "test:result:notify:abc");
        assert_eq!(keys.schedule("nightly"), "test:schedules:nightly");
        assert_eq!(keys.schedule_lock("nightly"), "test:schedule_lock:nightly");
    }

    #[test]
    fn default_prefix_is_bananas() {
        assert_eq!(RedisKeys::default().job("x"), "bananas:job:x");
    }
}
