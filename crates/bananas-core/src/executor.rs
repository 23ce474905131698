//! The Executor: runs one dequeued job's handler under a deadline and records the outcome.
//!
//! Deliberately does not catch panics — a handler panic is expected to unwind out of
//! `execute`; the Worker Pool is the one place that wraps this in `catch_unwind`, since only
//! it knows how to keep a worker slot alive afterward.

use crate::error::{JobError, JobResult};
use crate::job::Job;
use crate::metrics::MetricsCollector;
use crate::queue::{FailOutcome, JobQueue};
use crate::registry::{HandlerRegistry, JobContext};
use crate::result::{JobOutcome, OutcomeStatus, ResultBackend};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Executor<Q, R> {
    registry: Arc<HandlerRegistry>,
    queue: Arc<Q>,
    result_backend: Arc<R>,
    metrics: Arc<MetricsCollector>,
}

impl<Q, R> Executor<Q, R>
where
    Q: JobQueue,
    R: ResultBackend,
{
    pub fn new(
        registry: Arc<HandlerRegistry>,
        queue: Arc<Q>,
        result_backend: Arc<R>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            queue,
            result_backend,
            metrics,
        }
    }

    /// Looks up the handler for `job.name`, runs it under `timeout`, and stores the outcome.
    /// A missing handler fails the job immediately without ever invoking anything.
    pub async fn execute(&self, job: Job, ctx: JobContext, timeout: Duration) -> JobResult<()> {
        let handler = match self.registry.get(&job.name) {
            Some(handler) => handler,
            None => {
                let message = format!("no handler registered for job name: {}", job.name);
                if self.queue.fail(&job.id, &message).await? == FailOutcome::DeadLettered {
                    self.metrics.record_dead_lettered();
                }
                self.metrics.record_error();
                return Err(JobError::NoHandler(job.name.clone()));
            }
        };

        let job_id = job.id.clone();
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, handler(ctx, job)).await;
        let duration = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                self.queue.complete(&job_id).await?;
                self.result_backend
                    .store(JobOutcome {
                        job_id,
                        status: OutcomeStatus::Completed,
                        result: None,
                        error: None,
                        completed_at: Utc::now(),
                        duration,
                    })
                    .await?;
                self.metrics.record_completed(duration);
                Ok(())
            }
            Ok(Err(handler_err)) => {
                let message = handler_err.to_string();
                if self.queue.fail(&job_id, &message).await? == FailOutcome::DeadLettered {
                    self.metrics.record_dead_lettered();
                }
                self.result_backend
                    .store(JobOutcome {
                        job_id,
                        status: OutcomeStatus::Failed,
                        result: None,
                        error: Some(message),
                        completed_at: Utc::now(),
                        duration,
                    })
                    .await?;
                self.metrics.record_failed(duration);
                Err(handler_err)
            }
            Err(_elapsed) => {
                let message = format!("job timed out after {:?}", timeout);
                if self.queue.fail(&job_id, &message).await? == FailOutcome::DeadLettered {
                    self.metrics.record_dead_lettered();
                }
                self.result_backend
                    .store(JobOutcome {
                        job_id,
                        status: OutcomeStatus::Failed,
                        result: None,
                        error: Some(message),
                        completed_at: Utc::now(),
                        duration,
                    })
                    .await?;
                self.metrics.record_failed(duration);
                Err(JobError::JobTimeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, Payload, Priority};
    use crate::registry::JobContext;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeQueue {
        completed: Mutex<Vec<JobId>>,
        failed: Mutex<Vec<(JobId, String)>>,
    }

    #[async_trait]
    impl JobQueue for FakeQueue {
        async fn enqueue(&self, job: Job) -> JobResult<JobId> {
            Ok(job.id)
        }
        async fn enqueue_scheduled(
            &self,
            job: Job,
            _at: chrono::DateTime<Utc>,
        ) -> JobResult<JobId> {
            Ok(job.id)
        }
        async fn dequeue(&self, _routing_keys: &[String]) -> JobResult<Option<Job>> {
            Ok(None)
        }
        async fn complete(&self, job_id: &JobId) -> JobResult<()> {
            self.completed.lock().push(job_id.clone());
            Ok(())
        }
        async fn fail(&self, job_id: &JobId, error_message: &str) -> JobResult<crate::queue::FailOutcome> {
            self.failed.lock().push((job_id.clone(), error_message.to_string()));
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
    struct FakeResultBackend {
        stored: Mutex<HashMap<String, JobOutcome>>,
    }

    #[async_trait]
    impl ResultBackend for FakeResultBackend {
        async fn store(&self, outcome: JobOutcome) -> JobResult<()> {
            self.stored.lock().insert(outcome.job_id.as_str().to_string(), outcome);
            Ok(())
        }
        async fn get(&self, job_id: &JobId) -> JobResult<Option<JobOutcome>> {
            Ok(self.stored.lock().get(job_id.as_str()).cloned())
        }
        async fn wait(&self, job_id: &JobId, _timeout: Duration) -> JobResult<Option<JobOutcome>> {
            self.get(job_id).await
        }
        async fn delete(&self, job_id: &JobId) -> JobResult<()> {
            self.stored.lock().remove(job_id.as_str());
            Ok(())
        }
    }

    fn context(job_id: JobId) -> JobContext {
        JobContext {
            job_id,
            attempt: 1,
            max_retries: 3,
            worker_id: "test-worker".to_string(),
            started_at: Utc::now(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn successful_handler_completes_and_stores_outcome() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("echo", |_ctx, _job| async { Ok(()) });
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResultBackend::default());
        let metrics = Arc::new(MetricsCollector::new());
        let executor = Executor::new(registry, queue.clone(), results.clone(), metrics);

        let job = Job::new("echo", Payload::text("hi"));
        let job_id = job.id.clone();
        let ctx = context(job_id.clone());
        executor.execute(job, ctx, Duration::from_secs(1)).await.unwrap();

        assert_eq!(queue.completed.lock().len(), 1);
        let stored = results.get(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutcomeStatus::Completed);
    }

    #[tokio::test]
    async fn missing_handler_fails_without_invoking_anything() {
        let registry = Arc::new(HandlerRegistry::new());
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResultBackend::default());
        let metrics = Arc::new(MetricsCollector::new());
        let executor = Executor::new(registry, queue.clone(), results, metrics);

        let job = Job::new("ghost", Payload::text("hi"));
        let job_id = job.id.clone();
        let ctx = context(job_id.clone());
        let err = executor
            .execute(job, ctx, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::NoHandler(_)));
        assert_eq!(queue.failed.lock().len(), 1);
    }

    #[tokio::test]
    async fn handler_exceeding_deadline_fails_as_timeout() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("slow", |_ctx, _job| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        });
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResultBackend::default());
        let metrics = Arc::new(MetricsCollector::new());
        let executor = Executor::new(registry, queue.clone(), results, metrics);

        let job = Job::new("slow", Payload::text("hi"));
        let ctx = context(job.id.clone());
        let err = executor
            .execute(job, ctx, Duration::from_millis(5))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::JobTimeout(_)));
        assert_eq!(queue.failed.lock().len(), 1);
    }

    #[tokio::test]
    async fn handler_error_fails_with_the_returned_message() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("boom", |_ctx, _job| async {
            Err(JobError::Internal("kaboom".to_string()))
        });
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResultBackend::default());
        let metrics = Arc::new(MetricsCollector::new());
        let executor = Executor::new(registry, queue.clone(), results.clone(), metrics);

        let job = Job::new("boom", Payload::text("hi"));
        let job_id = job.id.clone();
        let ctx = context(job_id.clone());
        executor
            .execute(job, ctx, Duration::from_secs(1))
            .await
            .unwrap_err();

        let stored = results.get(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutcomeStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("internal error: kaboom"));
    }
}
