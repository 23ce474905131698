//! Redis-backed `ScheduleStore`: one hash per schedule for derived state, one TTL'd string
//! per schedule for the distributed lock.

use super::RedisKeys;
use crate::error::JobResult;
use crate::schedule::ScheduleState;
use crate::scheduler::ScheduleStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Compare-and-delete Lua script: only releases the lock if the caller's token still
/// matches, so one scheduler instance never deletes a lock another instance re-acquired
/// after the first one's TTL expired.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub struct RedisScheduleStore {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisScheduleStore {
    pub fn new(pool: Pool, key_prefix: &str) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
        }
    }
}

#[async_trait]
impl ScheduleStore for RedisScheduleStore {
    async fn get_state(&self, schedule_id: &str) -> JobResult<ScheduleState> {
        let mut conn = self.pool.get().await?;
        let key = self.keys.schedule(schedule_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;

        let parse_ts = |field: &str| {
            fields
                .get(field)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        Ok(ScheduleState {
            last_run: parse_ts("last_run"),
            next_run: parse_ts("next_run"),
            last_success: parse_ts("last_success"),
            last_error: fields.get("last_error").cloned(),
            run_count: fields.get("run_count").and_then(|s| s.parse().ok()).unwrap_or(0),
        })
    }

    async fn save_state(&self, schedule_id: &str, state: &ScheduleState) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let key = self.keys.schedule(schedule_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(last_run) = state.last_run {
            pipe.hset(&key, "last_run", last_run.to_rfc3339()).ignore();
        }
        if let Some(next_run) = state.next_run {
            pipe.hset(&key, "next_run", next_run.to_rfc3339()).ignore();
        }
        if let Some(last_success) = state.last_success {
            pipe.hset(&key, "last_success", last_success.to_rfc3339()).ignore();
        }
        match &state.last_error {
            Some(err) => {
                pipe.hset(&key, "last_error", err).ignore();
            }
            None => {
                pipe.hdel(&key, "last_error").ignore();
            }
        }
        pipe.hset(&key, "run_count", state.run_count).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn try_acquire_lock(&self, schedule_id: &str, ttl: Duration) -> JobResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let key = self.keys.schedule_lock(schedule_id);
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1) as i64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn release_lock(&self, schedule_id: &str, token: &str) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let key = self.keys.schedule_lock(schedule_id);
        let _: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
