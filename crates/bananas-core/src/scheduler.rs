//! The Cron Scheduler: a registry of `Schedule` entries paired with a tick loop that
//! enqueues due schedules under a per-schedule distributed lock.

use crate::error::{JobError, JobResult};
use crate::job::{Job, Priority};
use crate::queue::JobQueue;
use crate::schedule::{Schedule, ScheduleState};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// One second of grace on top of `next_run`, absorbing tick-loop drift.
const DUE_GRACE: chrono::Duration = chrono::Duration::seconds(1);

/// TTL on the distributed per-schedule lock. Long enough to cover a slow enqueue, short
/// enough that a scheduler that dies holding the lock doesn't stall the schedule for long.
const LOCK_TTL: Duration = Duration::from_secs(60);

/// Durable storage for schedule derived state and the distributed lock used to make a
/// single tick's enqueue single-fire across a fleet of scheduler processes.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_state(&self, schedule_id: &str) -> JobResult<ScheduleState>;
    async fn save_state(&self, schedule_id: &str, state: &ScheduleState) -> JobResult<()>;

    /// Attempts `SET key token NX EX ttl`. Returns the token on success, `None` if another
    /// process already holds the lock.
    async fn try_acquire_lock(&self, schedule_id: &str, ttl: Duration) -> JobResult<Option<String>>;

    /// Compare-and-delete keyed on `token`, so a process never releases a lock it doesn't
    /// currently hold (e.g. one it held but that already expired and was re-acquired).
    async fn release_lock(&self, schedule_id: &str, token: &str) -> JobResult<()>;
}

struct Entry {
    schedule: Schedule,
    /// Anchor used when a schedule has never run: "the process's first-seen time", per §4.7
    /// step 2. Computed once at registration so repeated ticks before the first fire don't
    /// keep recomputing a moving `next_run` off of `now`.
    first_seen: chrono::DateTime<Utc>,
}

/// Registry of schedules plus the tick loop that evaluates them. Generic over the queue and
/// schedule-state backends so tests can substitute in-memory fakes for both.
pub struct CronScheduler<Q, S> {
    queue: Arc<Q>,
    store: Arc<S>,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    tick_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl<Q, S> CronScheduler<Q, S>
where
    Q: JobQueue + 'static,
    S: ScheduleStore + 'static,
{
    pub fn new(queue: Arc<Q>, store: Arc<S>, tick_interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            store,
            entries: Arc::new(RwLock::new(HashMap::new())),
            tick_interval,
            shutdown_tx,
        }
    }

    /// Registers a schedule. Fails with `DuplicateScheduleId` on a repeated id; `Schedule`'s
    /// own constructor already rejects invalid cron/timezone before it ever reaches here.
    pub fn register(&self, schedule: Schedule) -> JobResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&schedule.id) {
            return Err(JobError::DuplicateScheduleId(schedule.id.clone()));
        }
        info!(schedule_id = %schedule.id, cron = %schedule.cron, "registered schedule");
        entries.insert(
            schedule.id.clone(),
            Entry {
                schedule,
                first_seen: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn schedule_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Spawns the tick loop and returns immediately.
    pub fn spawn(&self) {
        let queue = self.queue.clone();
        let store = self.store.clone();
        let entries = self.entries.clone();
        let tick_interval = self.tick_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("cron scheduler observed shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        tick(&queue, &store, &entries).await;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn tick<Q, S>(
    queue: &Arc<Q>,
    store: &Arc<S>,
    entries: &Arc<RwLock<HashMap<String, Entry>>>,
) where
    Q: JobQueue,
    S: ScheduleStore,
{
    let due: Vec<(Schedule, chrono::DateTime<Utc>)> = entries
        .read()
        .values()
        .filter(|e| e.schedule.enabled)
        .map(|e| (e.schedule.clone(), e.first_seen))
        .collect();

    for (schedule, first_seen) in due {
        if let Err(e) = evaluate_one(queue, store, &schedule, first_seen).await {
            error!(schedule_id = %schedule.id, error = %e, "cron tick failed for schedule");
        }
    }
}

async fn evaluate_one<Q, S>(
    queue: &Arc<Q>,
    store: &Arc<S>,
    schedule: &Schedule,
    first_seen: chrono::DateTime<Utc>,
) -> JobResult<()>
where
    Q: JobQueue,
    S: ScheduleStore,
{
    let now = Utc::now();
    let state = store.get_state(&schedule.id).await?;

    let anchor = state.last_run.unwrap_or(first_seen);
    let next_run = match state.next_run {
        Some(next_run) => next_run,
        None => schedule
            .next_run_after(anchor)?
            .unwrap_or(anchor),
    };

    if now < next_run - DUE_GRACE {
        return Ok(());
    }

    let token = match store.try_acquire_lock(&schedule.id, LOCK_TTL).await? {
        Some(token) => token,
        None => {
            debug!(schedule_id = %schedule.id, "schedule lock held elsewhere this tick, skipping");
            return Ok(());
        }
    };

    let mut job = Job::new(&schedule.job, schedule.payload.clone());
    job.priority = schedule.priority;
    job.description = schedule.description.clone();

    let mut new_state = state.clone();
    match queue.enqueue(job).await {
        Ok(job_id) => {
            new_state.last_run = Some(now);
            new_state.next_run = schedule.next_run_after(now)?;
            new_state.last_success = Some(now);
            new_state.last_error = None;
            new_state.run_count += 1;
            store.save_state(&schedule.id, &new_state).await?;
            info!(schedule_id = %schedule.id, job_id = %job_id, run_count = new_state.run_count, "cron enqueued job");
        }
        Err(e) => {
            new_state.last_error = Some(e.to_string());
            store.save_state(&schedule.id, &new_state).await?;
            warn!(schedule_id = %schedule.id, error = %e, "cron failed to enqueue job");
        }
    }

    store.release_lock(&schedule.id, &token).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, Payload};
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;

    #[derive(Default)]
    struct FakeQueue {
        enqueued: Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl JobQueue for FakeQueue {
        async fn enqueue(&self, job: Job) -> JobResult<JobId> {
            let id = job.id.clone();
            self.enqueued.lock().push(job);
            Ok(id)
        }
        async fn enqueue_scheduled(&self, job: Job, _at: chrono::DateTime<Utc>) -> JobResult<JobId> {
            Ok(job.id)
        }
        async fn dequeue(&self, _routing_keys: &[String]) -> JobResult<Option<Job>> {
            Ok(None)
        }
        async fn complete(&self, _job_id: &JobId) -> JobResult<()> {
            Ok(())
        }
        async fn fail(&self, _job_id: &JobId, _error_message: &str) -> JobResult<crate::queue::FailOutcome> {
            Ok(crate::queue::FailOutcome::Retried)
        }
        async fn move_scheduled_to_ready(&self) -> JobResult<u64> {
            Ok(0)
        }
        async fn get_job(&self, _job_id: &JobId) -> JobResult<Job> {
            Err(JobError::JobNotFound("unused".into()))
        }
        async fn queue_depth(&self, _routing_key: &str, _priority: Priority) -> JobResult<u64> {
            Ok(0)
        }
        async fn dead_letter_depth(&self) -> JobResult<u64> {
            Ok(0)
        }
        async fn scheduled_depth(&self) -> JobResult<u64> {
            Ok(0)
        }
        async fn processing_depth(&self) -> JobResult<u64> {
            Ok(0)
        }
        async fn reap_stale_leases(&self, _threshold: Duration) -> JobResult<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        states: Mutex<StdHashMap<String, ScheduleState>>,
        locks: Mutex<StdHashMap<String, String>>,
    }

    #[async_trait]
    impl ScheduleStore for FakeStore {
        async fn get_state(&self, schedule_id: &str) -> JobResult<ScheduleState> {
            Ok(self.states.lock().get(schedule_id).cloned().unwrap_or_default())
        }
        async fn save_state(&self, schedule_id: &str, state: &ScheduleState) -> JobResult<()> {
            self.states.lock().insert(schedule_id.to_string(), state.clone());
            Ok(())
        }
        async fn try_acquire_lock(&self, schedule_id: &str, _ttl: Duration) -> JobResult<Option<String>> {
            let mut locks = self.locks.lock();
            if locks.contains_key(schedule_id) {
                return Ok(None);
            }
            let token = uuid::Uuid::new_v4().to_string();
            locks.insert(schedule_id.to_string(), token.clone());
            Ok(Some(token))
        }
        async fn release_lock(&self, schedule_id: &str, token: &str) -> JobResult<()> {
            let mut locks = self.locks.lock();
            if locks.get(schedule_id).map(String::as_str) == Some(token) {
                locks.remove(schedule_id);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn registering_duplicate_id_fails() {
        let scheduler = CronScheduler::new(
            Arc::new(FakeQueue::default()),
            Arc::new(FakeStore::default()),
            Duration::from_millis(50),
        );
        let schedule = Schedule::new("nightly", "*/1 * * * *", "ping", Payload::text("{}")).unwrap();
        scheduler.register(schedule.clone()).unwrap();
        assert!(matches!(
            scheduler.register(schedule),
            Err(JobError::DuplicateScheduleId(_))
        ));
    }

    #[tokio::test]
    async fn never_run_schedule_fires_on_first_due_tick() {
        let queue = Arc::new(FakeQueue::default());
        let store = Arc::new(FakeStore::default());
        let scheduler = CronScheduler::new(queue.clone(), store.clone(), Duration::from_millis(50));

        // A schedule whose anchor ("first seen") is far enough in the past that `next_run`
        // has already elapsed fires on the very next tick.
        let schedule = Schedule::new("now", "*/1 * * * *", "ping", Payload::text("{}")).unwrap();
        scheduler.entries.write().insert(
            "now".to_string(),
            Entry {
                schedule,
                first_seen: Utc::now() - chrono::Duration::minutes(5),
            },
        );

        tick(&queue, &store, &scheduler.entries).await;

        assert_eq!(queue.enqueued.lock().len(), 1);
        let state = store.get_state("now").await.unwrap();
        assert_eq!(state.run_count, 1);
        assert!(state.last_run.is_some());
    }

    #[tokio::test]
    async fn second_tick_with_no_new_due_time_does_not_refire() {
        let queue = Arc::new(FakeQueue::default());
        let store = Arc::new(FakeStore::default());
        let scheduler = CronScheduler::new(queue.clone(), store.clone(), Duration::from_millis(50));
        let schedule = Schedule::new("once", "*/1 * * * *", "ping", Payload::text("{}")).unwrap();
        scheduler.entries.write().insert(
            "once".to_string(),
            Entry {
                schedule,
                first_seen: Utc::now() - chrono::Duration::minutes(5),
            },
        );

        tick(&queue, &store, &scheduler.entries).await;
        tick(&queue, &store, &scheduler.entries).await;

        // The second tick's `next_run` (computed from the freshly-updated `last_run`) is in
        // the future, so only the first tick enqueues.
        assert_eq!(queue.enqueued.lock().len(), 1);
    }

    #[tokio::test]
    async fn held_lock_skips_the_tick_without_erroring() {
        let queue = Arc::new(FakeQueue::default());
        let store = Arc::new(FakeStore::default());
        store.locks.lock().insert("locked".to_string(), "someone-else".to_string());
        let scheduler = CronScheduler::new(queue.clone(), store.clone(), Duration::from_millis(50));
        let schedule = Schedule::new("locked", "*/1 * * * *", "ping", Payload::text("{}")).unwrap();
        scheduler.entries.write().insert(
            "locked".to_string(),
            Entry {
                schedule,
                first_seen: Utc::now() - chrono::Duration::minutes(5),
            },
        );

        tick(&queue, &store, &scheduler.entries).await;
        assert_eq!(queue.enqueued.lock().len(), 0);
    }
}
