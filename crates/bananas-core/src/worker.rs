//! The Worker Pool: N independent consumer loops, panic recovery, and a reaper task for
//! stale leases.

use crate::config::WorkerSettings;
use crate::executor::Executor;
use crate::metrics::MetricsCollector;
use crate::queue::{FailOutcome, JobQueue};
use crate::registry::JobContext;
use crate::result::ResultBackend;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default reaper sweep interval and the multiple of `job_timeout` a lease must exceed
/// before it's considered abandoned.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);
const REAPER_THRESHOLD_MULTIPLIER: u32 = 3;
const DEQUEUE_BACKOFF_CAP: Duration = Duration::from_secs(30);

pub struct WorkerPool<Q, R> {
    id: String,
    queue: Arc<Q>,
    executor: Arc<Executor<Q, R>>,
    settings: WorkerSettings,
    shutdown_tx: broadcast::Sender<()>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    active_slots: Arc<AtomicU64>,
    /// Slot task handles, so `stop` can wait for an actual drain instead of a fixed sleep.
    /// Only the per-slot consumer loops are tracked; the reaper and depth sampler are
    /// best-effort background tasks that `stop` doesn't wait on.
    slot_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<Q, R> WorkerPool<Q, R>
where
    Q: JobQueue + 'static,
    R: ResultBackend + 'static,
{
    pub fn new(queue: Arc<Q>, executor: Arc<Executor<Q, R>>, settings: WorkerSettings) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: format!("pool-{}", Uuid::new_v4()),
            queue,
            executor,
            settings,
            shutdown_tx,
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
            active_slots: Arc::new(AtomicU64::new(0)),
            slot_handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `concurrency` consumer loops plus the reaper, and returns immediately. Call
    /// `stop` to begin a graceful shutdown; this function does not block.
    pub fn spawn(&self, metrics: Arc<MetricsCollector>) {
        info!(
            pool_id = %self.id,
            concurrency = self.settings.concurrency,
            mode = ?self.settings.mode,
            "starting worker pool"
        );

        for slot in 0..self.settings.concurrency {
            let worker_id = format!("{}-slot-{slot}", self.id);
            let queue = self.queue.clone();
            let executor = self.executor.clone();
            let settings = self.settings.clone_for_slot();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let jobs_processed = self.jobs_processed.clone();
            let jobs_failed = self.jobs_failed.clone();
            let active_slots = self.active_slots.clone();
            let metrics = metrics.clone();

            let concurrency = self.settings.concurrency as u64;
            let handle = tokio::spawn(async move {
                run_slot(
                    worker_id,
                    queue,
                    executor,
                    settings,
                    &mut shutdown_rx,
                    jobs_processed,
                    jobs_failed,
                    active_slots,
                    metrics,
                    concurrency,
                )
                .await;
            });
            self.slot_handles.lock().push(handle);
        }

        let queue = self.queue.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let job_timeout = self.settings.job_timeout();
        tokio::spawn(async move {
            run_reaper(queue, job_timeout, &mut shutdown_rx).await;
        });

        let queue = self.queue.clone();
        let routing_keys = self.settings.routing_keys.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            run_queue_depth_sampler(queue, routing_keys, metrics, &mut shutdown_rx).await;
        });
    }

    /// Signals every slot to stop and waits up to the configured shutdown timeout for them
    /// to drain. Slots only observe this between iterations, matching the at-least-once
    /// contract: an in-flight handler is never interrupted by shutdown. If the drain ceiling
    /// elapses first, this logs a warning and returns anyway, leaving any still-running jobs
    /// to reappear in the processing list for the next dequeuer.
    pub async fn stop(&self) {
        info!(pool_id = %self.id, "stopping worker pool");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.slot_handles.lock());
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(self.settings.shutdown_timeout(), drain).await {
            Ok(()) => info!(pool_id = %self.id, "worker pool drained cleanly"),
            Err(_) => warn!(
                pool_id = %self.id,
                ceiling = ?self.settings.shutdown_timeout(),
                "worker pool drain ceiling exceeded, returning with slots still running"
            ),
        }
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn active_slots(&self) -> u64 {
        self.active_slots.load(Ordering::Relaxed)
    }
}

/// Per-slot settings cloned out so each spawned task owns its copy.
impl WorkerSettings {
    fn clone_for_slot(&self) -> SlotSettings {
        SlotSettings {
            routing_keys: self.routing_keys.clone(),
            job_types: self.job_types.clone(),
            job_timeout: self.job_timeout(),
            poll_timeout: self.poll_timeout(),
        }
    }
}

struct SlotSettings {
    routing_keys: Vec<String>,
    job_types: Option<Vec<String>>,
    job_timeout: Duration,
    /// Paused after a dequeue attempt that found nothing, so an empty queue doesn't turn
    /// into a tight loop of non-blocking polls against the data store.
    poll_timeout: Duration,
}

#[allow(clippy::too_many_arguments)]
async fn run_slot<Q, R>(
    worker_id: String,
    queue: Arc<Q>,
    executor: Arc<Executor<Q, R>>,
    settings: SlotSettings,
    shutdown_rx: &mut broadcast::Receiver<()>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    active_slots: Arc<AtomicU64>,
    metrics: Arc<MetricsCollector>,
    concurrency: u64,
) where
    Q: JobQueue + 'static,
    R: ResultBackend + 'static,
{
    let mut consecutive_failures = 0u32;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            debug!(worker_id = %worker_id, "slot observed shutdown signal");
            break;
        }

        let job = match queue.dequeue(&settings.routing_keys).await {
            Ok(job) => {
                consecutive_failures = 0;
                job
            }
            Err(e) => {
                consecutive_failures += 1;
                let backoff = crate::backoff::with_jitter(crate::backoff::exponential_seconds(
                    consecutive_failures,
                    DEQUEUE_BACKOFF_CAP,
                ));
                warn!(worker_id = %worker_id, error = %e, backoff = ?backoff, "dequeue failed, backing off");
                metrics.record_error();
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        let job = match job {
            Some(job) => job,
            None => {
                // Nothing appeared within the aggregate poll window; pause before the next
                // poll so an empty queue doesn't turn into a tight non-blocking loop.
                tokio::time::sleep(settings.poll_timeout).await;
                continue;
            }
        };

        if let Some(job_types) = &settings.job_types {
            if !job_types.iter().any(|name| name == &job.name) {
                debug!(worker_id = %worker_id, job_name = %job.name, "job filtered by job-specialized mode");
                continue;
            }
        }

        active_slots.fetch_add(1, Ordering::Relaxed);
        metrics.set_worker_slots(active_slots.load(Ordering::Relaxed), concurrency);
        let job_id = job.id.clone();
        let ctx = JobContext {
            job_id: job_id.clone(),
            attempt: job.attempts,
            max_retries: job.max_retries,
            worker_id: worker_id.clone(),
            started_at: chrono::Utc::now(),
            correlation_id: job.correlation_id.clone(),
        };

        let outcome = AssertUnwindSafe(executor.execute(job, ctx, settings.job_timeout))
            .catch_unwind()
            .await;

        active_slots.fetch_sub(1, Ordering::Relaxed);
        metrics.set_worker_slots(active_slots.load(Ordering::Relaxed), concurrency);

        match outcome {
            Ok(Ok(())) => {
                jobs_processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                jobs_failed.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id = %worker_id, job_id = %job_id, error = %e, "job did not complete");
            }
            Err(panic_payload) => {
                let message = format!("PANIC: {}", panic_message(&panic_payload));
                error!(worker_id = %worker_id, job_id = %job_id, message = %message, "handler panicked");
                match queue.fail(&job_id, &message).await {
                    Ok(FailOutcome::DeadLettered) => metrics.record_dead_lettered(),
                    Ok(FailOutcome::Retried) => {}
                    Err(e) => {
                        error!(worker_id = %worker_id, job_id = %job_id, error = %e, "failed to record panic as a failure");
                    }
                }
                jobs_failed.fetch_add(1, Ordering::Relaxed);
                metrics.record_error();
            }
        }
    }
}

async fn run_reaper<Q: JobQueue + 'static>(
    queue: Arc<Q>,
    job_timeout: Duration,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let threshold = job_timeout * REAPER_THRESHOLD_MULTIPLIER;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(REAPER_INTERVAL) => {
                match queue.reap_stale_leases(threshold).await {
                    Ok(0) => {}
                    Ok(n) => info!(recovered = n, "reaper requeued stale leases"),
                    Err(e) => warn!(error = %e, "reaper sweep failed"),
                }
            }
        }
    }
}

/// How often the pool samples observed queue depth per priority for the Metrics Collector.
/// Sampling only, per §4.9 — never consulted by any dequeue or dispatch decision.
const QUEUE_DEPTH_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

async fn run_queue_depth_sampler<Q: JobQueue + 'static>(
    queue: Arc<Q>,
    routing_keys: Vec<String>,
    metrics: Arc<MetricsCollector>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(QUEUE_DEPTH_SAMPLE_INTERVAL) => {
                for priority in crate::job::Priority::ALL_HIGH_FIRST {
                    let mut total = 0u64;
                    for routing_key in &routing_keys {
                        match queue.queue_depth(routing_key, priority).await {
                            Ok(depth) => total += depth,
                            Err(e) => {
                                warn!(error = %e, routing_key = %routing_key, "queue depth sample failed");
                            }
                        }
                    }
                    metrics.set_queue_depth(priority, total);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
