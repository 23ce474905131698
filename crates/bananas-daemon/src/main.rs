//! Bananas daemon: composition root. Loads config, builds the Redis-backed Queue Engine,
//! Result Backend, and Schedule Store, wires the Worker Pool and Cron Scheduler, registers
//! the daemon's demo handlers and schedules, and drives graceful shutdown on SIGINT/SIGTERM.

mod handlers;
mod logging;

use anyhow::Context;
use bananas_core::{
    create_pool, BananasConfig, Client, CronScheduler, Executor, HandlerRegistry,
    MetricsCollector, RedisJobQueue, RedisResultBackend, RedisScheduleStore, Schedule,
    WorkerMode, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// How often the promotion loop ranges the scheduled set for due members. Independent of
/// the cron scheduler's own tick interval — this loop exists purely to implement §4.2's
/// `MoveScheduledToReady`, not to evaluate cron expressions.
const PROMOTION_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BananasConfig::load().context("failed to load configuration")?;
    let _log_guard = logging::init(&config);

    info!(version = env!("CARGO_PKG_VERSION"), mode = ?config.worker.mode, "starting bananas-daemon");

    if let Err(e) = run(config).await {
        error!(error = %e, "bananas-daemon exited with an error");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: BananasConfig) -> anyhow::Result<()> {
    let pool = create_pool(&config.redis).await.context("failed to connect to redis")?;

    let queue = Arc::new(RedisJobQueue::new(pool.clone(), &config.redis.key_prefix));
    let results = Arc::new(RedisResultBackend::new(
        pool.clone(),
        config.redis.url.as_str(),
        &config.redis.key_prefix,
        config.result.clone(),
    ));
    let schedule_store = Arc::new(RedisScheduleStore::new(pool.clone(), &config.redis.key_prefix));
    let metrics = Arc::new(MetricsCollector::new());

    let registry = Arc::new(HandlerRegistry::new());
    handlers::register_all(&registry);
    info!(handler_count = registry.count(), "registered handlers");

    let executor = Arc::new(Executor::new(
        registry.clone(),
        queue.clone(),
        results.clone(),
        metrics.clone(),
    ));

    let worker_pool = (config.worker.mode != WorkerMode::SchedulerOnly)
        .then(|| WorkerPool::new(queue.clone(), executor.clone(), config.worker.clone()));
    if let Some(pool) = &worker_pool {
        pool.spawn(metrics.clone());
    } else {
        info!("scheduler-only mode: no execution slots started");
    }

    let cron_scheduler = config.scheduler.enabled.then(|| {
        let scheduler = CronScheduler::new(queue.clone(), schedule_store.clone(), config.scheduler.interval());
        let heartbeat = Schedule::new("heartbeat", "*/1 * * * *", "ping", bananas_core::Payload::text("{}"))
            .expect("built-in heartbeat schedule is valid");
        if let Err(e) = scheduler.register(heartbeat) {
            error!(error = %e, "failed to register the daemon's built-in heartbeat schedule");
        }
        scheduler.spawn();
        scheduler
    });

    let promotion_queue = queue.clone();
    let promotion_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROMOTION_INTERVAL);
        loop {
            ticker.tick().await;
            match promotion_queue.move_scheduled_to_ready().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(moved = n, "promoted scheduled jobs to ready"),
                Err(e) => tracing::warn!(error = %e, "scheduled-set promotion sweep failed"),
            }
        }
    });

    let _client = Client::new(queue.clone(), results.clone(), metrics.clone());

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    promotion_task.abort();
    if let Some(scheduler) = &cron_scheduler {
        scheduler.stop();
    }
    if let Some(pool) = &worker_pool {
        pool.stop().await;
    }

    info!("bananas-daemon shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
