//! Bananas — the coordination layer for a distributed background-job system.
//!
//! Producers submit named units of work with a payload and priority; consumer processes
//! execute them according to priority, routing, and scheduling policy, with bounded retry
//! and result delivery. This crate implements the queue state machine, the routing-and-
//! priority dispatch policy, the worker pool, the cron scheduler, and the result backend —
//! everything above a Redis-compatible data store. Handler implementations, process
//! supervision, and CLI plumbing live in the `bananas-daemon` binary crate instead.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod registry;
pub mod result;
pub mod schedule;
pub mod scheduler;
pub mod worker;

pub use client::Client;
pub use config::{BananasConfig, WorkerMode};
pub use error::{JobError, JobResult};
pub use executor::Executor;
pub use job::{Job, JobId, JobStatus, Payload, Priority};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use queue::{FailOutcome, JobQueue};
pub use redis::{create_pool, RedisJobQueue, RedisResultBackend, RedisScheduleStore};
pub use registry::{HandlerRegistry, JobContext};
pub use result::{JobOutcome, OutcomeStatus, ResultBackend};
pub use schedule::{Schedule, ScheduleState};
pub use scheduler::{CronScheduler, ScheduleStore};
pub use worker::WorkerPool;

/// Re-export of the types a typical producer or worker binary needs.
pub mod prelude {
    pub use crate::client::Client;
    pub use crate::config::{BananasConfig, WorkerMode};
    pub use crate::error::{JobError, JobResult};
    pub use crate::executor::Executor;
    pub use crate::job::{Job, JobId, JobStatus, Payload, Priority};
    pub use crate::queue::JobQueue;
    pub use crate::registry::{HandlerRegistry, JobContext};
    pub use crate::result::{JobOutcome, OutcomeStatus, ResultBackend};
    pub use crate::schedule::Schedule;
    pub use crate::scheduler::CronScheduler;
    pub use crate::worker::WorkerPool;
}
