//! Metrics Collector: process-local counters plus an in-process queryable snapshot.
//!
//! Every counter is also emitted to the `metrics` facade so an embedding process can wire up
//! whatever recorder it likes (Prometheus, statsd, ...); that wiring is out of scope here.
//! `MetricsCollector::snapshot()` answers "what are the current counts" without requiring a
//! recorder to be installed at all, which the facade alone cannot do.

use crate::job::Priority;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metric names emitted to the `metrics` facade.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "bananas_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "bananas_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "bananas_jobs_failed_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "bananas_jobs_dead_lettered_total";
    pub const JOB_DURATION_SECONDS: &str = "bananas_job_duration_seconds";
    pub const QUEUE_DEPTH: &str = "bananas_queue_depth";
    pub const WORKERS_ACTIVE: &str = "bananas_workers_active";
    pub const ERRORS_TOTAL: &str = "bananas_errors_total";
}

/// Registers metric descriptions with the installed `metrics` recorder, if any.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total jobs submitted");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total jobs completed");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total jobs failed (including retried)");
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total jobs moved to the dead-letter queue"
    );
    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");
    describe_gauge!(names::QUEUE_DEPTH, "Observed queue depth, sampled per priority");
    describe_gauge!(names::WORKERS_ACTIVE, "Worker slots currently executing a job");
    describe_counter!(names::ERRORS_TOTAL, "Total data-store/operational errors observed");
}

/// Deep-copyable point-in-time read of the collector's counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub high_priority: u64,
    pub normal_priority: u64,
    pub low_priority: u64,
    pub queue_depth_high: u64,
    pub queue_depth_normal: u64,
    pub queue_depth_low: u64,
    pub active_workers: u64,
    pub total_workers: u64,
    pub errors: u64,
    pub average_duration: Duration,
    pub uptime: Duration,
}

/// Process-local counters and histograms. Cheap to clone (an `Arc` around this is expected);
/// every field that can be mutated concurrently is an atomic, matching the "no in-process
/// lock required" resource policy for counters.
pub struct MetricsCollector {
    started_at: Instant,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    by_priority: [AtomicU64; 3],
    queue_depth: [AtomicU64; 3],
    active_workers: AtomicU64,
    total_workers: AtomicU64,
    errors: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_count: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        register_metrics();
        Self {
            started_at: Instant::now(),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            by_priority: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            queue_depth: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            active_workers: AtomicU64::new(0),
            total_workers: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            duration_total_ms: AtomicU64::new(0),
            duration_count: AtomicU64::new(0),
        }
    }

    fn priority_index(priority: Priority) -> usize {
        match priority {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn record_submitted(&self, priority: Priority) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.by_priority[Self::priority_index(priority)].fetch_add(1, Ordering::Relaxed);
        counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
    }

    pub fn record_completed(&self, duration: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
        histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    pub fn record_failed(&self, duration: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
        counter!(names::JOBS_FAILED_TOTAL).increment(1);
        histogram!(names::JOB_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(names::ERRORS_TOTAL).increment(1);
    }

    pub fn set_queue_depth(&self, priority: Priority, depth: u64) {
        self.queue_depth[Self::priority_index(priority)].store(depth, Ordering::Relaxed);
        gauge!(names::QUEUE_DEPTH, "priority" => priority.as_str()).set(depth as f64);
    }

    pub fn set_worker_slots(&self, active: u64, total: u64) {
        self.active_workers.store(active, Ordering::Relaxed);
        self.total_workers.store(total, Ordering::Relaxed);
        gauge!(names::WORKERS_ACTIVE).set(active as f64);
    }

    fn record_duration(&self, duration: Duration) {
        self.duration_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.duration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a deep copy of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.duration_count.load(Ordering::Relaxed).max(1);
        let total_ms = self.duration_total_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            high_priority: self.by_priority[0].load(Ordering::Relaxed),
            normal_priority: self.by_priority[1].load(Ordering::Relaxed),
            low_priority: self.by_priority[2].load(Ordering::Relaxed),
            queue_depth_high: self.queue_depth[0].load(Ordering::Relaxed),
            queue_depth_normal: self.queue_depth[1].load(Ordering::Relaxed),
            queue_depth_low: self.queue_depth[2].load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            total_workers: self.total_workers.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            average_duration: Duration::from_millis(total_ms / count),
            uptime: self.started_at.elapsed(),
        }
    }
}
