//! The Config Loader: typed environment configuration with mode-specific defaults.
//!
//! Values are read once, with `config::Environment` layering `BANANAS_*` variables (and an
//! optional `.env` file via `dotenvy`) over per-field defaults. Fields left unset fall back
//! to a default that depends on `worker.mode`, which is why loading happens in two passes:
//! deserialize into [`RawConfig`] (every field optional), then [`RawConfig::resolve`] fills
//! in mode-aware defaults before [`BananasConfig::validate`] runs.

use crate::error::{JobError, JobResult};
use crate::job::Priority;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Selects the defaults profile for a worker process. Affects defaults only, never mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Thin,
    Default,
    Specialized,
    JobSpecialized,
    SchedulerOnly,
}

impl FromStr for WorkerMode {
    type Err = JobError;

    fn from_str(s: &str) -> JobResult<Self> {
        match s {
            "thin" => Ok(WorkerMode::Thin),
            "default" => Ok(WorkerMode::Default),
            "specialized" => Ok(WorkerMode::Specialized),
            "job-specialized" => Ok(WorkerMode::JobSpecialized),
            "scheduler-only" => Ok(WorkerMode::SchedulerOnly),
            other => Err(JobError::ConfigInvalid(format!(
                "unknown worker mode '{other}' (expected thin, default, specialized, job-specialized, or scheduler-only)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub pool_size: usize,
    pub connect_timeout_secs: u64,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub mode: WorkerMode,
    pub concurrency: usize,
    pub priorities: Vec<Priority>,
    pub routing_keys: Vec<String>,
    pub job_types: Option<Vec<String>>,
    pub job_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub max_retries: u32,
}

impl WorkerSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ResultSettings {
    pub enabled: bool,
    pub ttl_success_secs: u64,
    pub ttl_failure_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub file_path: Option<String>,
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct BananasConfig {
    pub redis: RedisSettings,
    pub worker: WorkerSettings,
    pub scheduler: SchedulerSettings,
    pub result: ResultSettings,
    pub logging: LoggingSettings,
}

impl BananasConfig {
    /// Loads `.env` (if present), layers `BANANAS_*` environment variables over defaults,
    /// applies mode-specific defaults, and validates the result.
    pub fn load() -> JobResult<Self> {
        dotenvy::dotenv().ok();

        let raw: RawConfig = config::Config::builder()
            .add_source(config::Environment::with_prefix("BANANAS").separator("__"))
            .build()
            .map_err(|e| JobError::ConfigInvalid(e.to_string()))?
            .try_deserialize()
            .map_err(|e| JobError::ConfigInvalid(e.to_string()))?;

        let resolved = raw.resolve()?;
        resolved.validate()?;
        Ok(resolved)
    }

    /// Builds a minimal, valid configuration for tests: default-mode settings restricted to
    /// the given routing keys, with short timeouts so integration tests don't stall.
    pub fn for_tests(routing_keys: &[&str]) -> Self {
        let mut cfg = RawConfig::default().resolve().expect("default raw config resolves");
        cfg.worker.routing_keys = routing_keys.iter().map(|s| s.to_string()).collect();
        cfg.worker.job_timeout_secs = 5;
        cfg.worker.poll_timeout_secs = 0;
        cfg
    }

    fn validate(&self) -> JobResult<()> {
        if self.redis.url.trim().is_empty() {
            return Err(JobError::ConfigInvalid("data-store URL must not be empty".into()));
        }
        if self.worker.concurrency < 1 && self.worker.mode != WorkerMode::SchedulerOnly {
            return Err(JobError::ConfigInvalid(
                "worker concurrency must be at least 1".into(),
            ));
        }
        if self.worker.routing_keys.is_empty() {
            return Err(JobError::ConfigInvalid(
                "worker routing keys must not be empty".into(),
            ));
        }
        for key in &self.worker.routing_keys {
            crate::job::Job::validate_routing_key(key)?;
        }
        if self.scheduler.interval_ms < 100 || self.scheduler.interval_ms > 60_000 {
            return Err(JobError::ConfigInvalid(
                "scheduler interval must be between 100ms and 60s".into(),
            ));
        }
        Ok(())
    }
}

/// Deserialized shape of the raw environment, before mode defaults are applied. Every field
/// is optional so "unset" is distinguishable from "set to the default value".
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    data_store_url: Option<String>,
    redis_pool_size: Option<usize>,
    redis_connect_timeout_secs: Option<u64>,
    key_prefix: Option<String>,

    worker_mode: Option<String>,
    worker_concurrency: Option<usize>,
    worker_priorities: Option<String>,
    worker_routing_keys: Option<String>,
    worker_job_types: Option<String>,

    job_timeout_secs: Option<u64>,
    poll_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    max_retries: Option<i64>,

    scheduler_enabled: Option<bool>,
    scheduler_interval_ms: Option<u64>,

    result_backend_enabled: Option<bool>,
    result_ttl_success_secs: Option<u64>,
    result_ttl_failure_secs: Option<u64>,

    log_level: Option<String>,
    log_json: Option<bool>,
    log_file_path: Option<String>,
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl RawConfig {
    fn resolve(self) -> JobResult<BananasConfig> {
        let mode = match self.worker_mode.as_deref() {
            Some(s) => WorkerMode::from_str(s)?,
            None => WorkerMode::Default,
        };

        let (default_concurrency, default_scheduler_enabled) = mode_defaults(mode);

        let priorities = match self.worker_priorities.as_deref() {
            Some(s) => parse_priorities(s)?,
            None => Priority::ALL_HIGH_FIRST.to_vec(),
        };

        let routing_keys = match self.worker_routing_keys.as_deref() {
            Some(s) => split_csv(s),
            None => vec!["default".to_string()],
        };

        let job_types = self.worker_job_types.as_deref().map(split_csv);

        let max_retries = self.max_retries.unwrap_or(3);
        if max_retries < 0 {
            return Err(JobError::ConfigInvalid("max retries must not be negative".into()));
        }

        Ok(BananasConfig {
            redis: RedisSettings {
                url: self
                    .data_store_url
                    .unwrap_or_else(|| "redis://localhost:6379".to_string()),
                pool_size: self.redis_pool_size.unwrap_or(10),
                connect_timeout_secs: self.redis_connect_timeout_secs.unwrap_or(5),
                key_prefix: self.key_prefix.unwrap_or_else(|| "bananas".to_string()),
            },
            worker: WorkerSettings {
                mode,
                concurrency: self.worker_concurrency.unwrap_or(default_concurrency),
                priorities,
                routing_keys,
                job_types,
                job_timeout_secs: self.job_timeout_secs.unwrap_or(300),
                poll_timeout_secs: self.poll_timeout_secs.unwrap_or(1),
                shutdown_timeout_secs: self.shutdown_timeout_secs.unwrap_or(30),
                max_retries: max_retries as u32,
            },
            scheduler: SchedulerSettings {
                enabled: self.scheduler_enabled.unwrap_or(default_scheduler_enabled),
                interval_ms: self.scheduler_interval_ms.unwrap_or(1000),
            },
            result: ResultSettings {
                enabled: self.result_backend_enabled.unwrap_or(true),
                ttl_success_secs: self.result_ttl_success_secs.unwrap_or(3600),
                ttl_failure_secs: self.result_ttl_failure_secs.unwrap_or(86_400),
            },
            logging: LoggingSettings {
                level: self.log_level.unwrap_or_else(|| "info".to_string()),
                json: self.log_json.unwrap_or(false),
                file_path: self.log_file_path,
            },
        })
    }
}

fn parse_priorities(s: &str) -> JobResult<Vec<Priority>> {
    split_csv(s)
        .into_iter()
        .map(|p| match p.as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(JobError::ConfigInvalid(format!("unknown priority '{other}'"))),
        })
        .collect()
}

/// `(concurrency, scheduler_enabled)` defaults per mode, applied before the caller's explicit
/// overrides are considered. `scheduler-only` runs no execution slots at all.
fn mode_defaults(mode: WorkerMode) -> (usize, bool) {
    match mode {
        WorkerMode::Thin => (5, true),
        WorkerMode::Default => (10, true),
        WorkerMode::Specialized => (10, false),
        WorkerMode::JobSpecialized => (10, false),
        WorkerMode::SchedulerOnly => (0, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig::default()
    }

    #[test]
    fn thin_mode_defaults_to_low_concurrency_with_scheduler_enabled() {
        let mut r = raw();
        r.worker_mode = Some("thin".to_string());
        let cfg = r.resolve().unwrap();
        assert_eq!(cfg.worker.concurrency, 5);
        assert!(cfg.scheduler.enabled);
    }

    #[test]
    fn scheduler_only_mode_runs_no_execution_slots_by_default() {
        let mut r = raw();
        r.worker_mode = Some("scheduler-only".to_string());
        let cfg = r.resolve().unwrap();
        assert_eq!(cfg.worker.concurrency, 0);
    }

    #[test]
    fn explicit_concurrency_overrides_the_mode_default() {
        let mut r = raw();
        r.worker_mode = Some("thin".to_string());
        r.worker_concurrency = Some(42);
        let cfg = r.resolve().unwrap();
        assert_eq!(cfg.worker.concurrency, 42);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let mut r = raw();
        r.worker_mode = Some("bogus".to_string());
        assert!(r.resolve().is_err());
    }

    #[test]
    fn negative_max_retries_is_rejected() {
        let mut r = raw();
        r.max_retries = Some(-1);
        assert!(r.resolve().is_err());
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let mut r = raw();
        r.worker_concurrency = Some(0);
        let cfg = r.resolve().unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn scheduler_interval_outside_bounds_fails_validation() {
        let mut r = raw();
        r.scheduler_interval_ms = Some(50);
        let cfg = r.resolve().unwrap();
        assert!(cfg.validate().is_err());

        let mut r = raw();
        r.scheduler_interval_ms = Some(70_000);
        let cfg = r.resolve().unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_routing_keys_fails_validation() {
        let mut r = raw();
        r.worker_routing_keys = Some(String::new());
        let cfg = r.resolve().unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_validates_cleanly() {
        let cfg = raw().resolve().unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn scheduler_only_mode_with_zero_concurrency_validates_cleanly() {
        let mut r = raw();
        r.worker_mode = Some("scheduler-only".to_string());
        let cfg = r.resolve().unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_still_fails_validation_outside_scheduler_only_mode() {
        let mut r = raw();
        r.worker_mode = Some("default".to_string());
        r.worker_concurrency = Some(0);
        let cfg = r.resolve().unwrap();
        assert!(cfg.validate().is_err());
    }
}
