//! The Client SDK: a thin producer façade over the Queue Engine and Result Backend.

use crate::error::JobResult;
use crate::job::{Job, JobId, Payload, Priority};
use crate::metrics::MetricsCollector;
use crate::queue::JobQueue;
use crate::result::{JobOutcome, ResultBackend};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Producer-side API. Generic over the queue and result backend so embedding applications
/// can depend on `Client<RedisJobQueue, RedisResultBackend>` concretely, or substitute fakes
/// in tests.
pub struct Client<Q, R> {
    queue: Arc<Q>,
    results: Arc<R>,
    metrics: Arc<MetricsCollector>,
}

impl<Q, R> Client<Q, R>
where
    Q: JobQueue,
    R: ResultBackend,
{
    pub fn new(queue: Arc<Q>, results: Arc<R>, metrics: Arc<MetricsCollector>) -> Self {
        Self { queue, results, metrics }
    }

    /// Enqueues a job for immediate dispatch on the default routing key.
    pub async fn submit_job(
        &self,
        name: impl Into<String>,
        payload: Payload,
        priority: Priority,
        description: Option<String>,
    ) -> JobResult<JobId> {
        let mut job = Job::new(name, payload);
        job.priority = priority;
        job.description = description;
        let id = self.queue.enqueue(job).await?;
        self.metrics.record_submitted(priority);
        Ok(id)
    }

    /// Enqueues a job for immediate dispatch on an explicit routing key. Validates the
    /// routing key locally before ever reaching the queue, per §4.8.
    pub async fn submit_job_with_route(
        &self,
        name: impl Into<String>,
        payload: Payload,
        priority: Priority,
        routing_key: impl Into<String>,
        description: Option<String>,
    ) -> JobResult<JobId> {
        let mut job = Job::new(name, payload);
        job.priority = priority;
        job.description = description;
        job.set_routing_key(routing_key)?;
        let id = self.queue.enqueue(job).await?;
        self.metrics.record_submitted(priority);
        Ok(id)
    }

    /// Enqueues a job directly into the scheduled set, to become eligible at `scheduled_for`.
    pub async fn submit_job_scheduled(
        &self,
        name: impl Into<String>,
        payload: Payload,
        priority: Priority,
        scheduled_for: DateTime<Utc>,
        description: Option<String>,
    ) -> JobResult<JobId> {
        let mut job = Job::new(name, payload);
        job.priority = priority;
        job.description = description;
        let id = self.queue.enqueue_scheduled(job, scheduled_for).await?;
        self.metrics.record_submitted(priority);
        Ok(id)
    }

    pub async fn get_job(&self, job_id: &JobId) -> JobResult<Job> {
        self.queue.get_job(job_id).await
    }

    pub async fn get_result(&self, job_id: &JobId) -> JobResult<Option<JobOutcome>> {
        self.results.get(job_id).await
    }

    /// Enqueues, then blocks (via the Result Backend's pub/sub wake-up) until the job
    /// finishes or `timeout` elapses. A `None` return means the job hadn't finished by the
    /// deadline, not that it failed.
    pub async fn submit_and_wait(
        &self,
        name: impl Into<String>,
        payload: Payload,
        priority: Priority,
        timeout: Duration,
        description: Option<String>,
    ) -> JobResult<Option<JobOutcome>> {
        let job_id = self.submit_job(name, payload, priority, description).await?;
        self.results.wait(&job_id, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobError, JobResult as Result};
    use crate::job::{JobId as Id, Priority as P};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeQueue {
        enqueued: Mutex<Vec<Job>>,
        jobs: Mutex<HashMap<String, Job>>,
    }

    #[async_trait]
    impl JobQueue for FakeQueue {
        async fn enqueue(&self, job: Job) -> Result<Id> {
            let id = job.id.clone();
            self.jobs.lock().insert(id.as_str().to_string(), job.clone());
            self.enqueued.lock().push(job);
            Ok(id)
        }
        async fn enqueue_scheduled(&self, job: Job, _at: DateTime<Utc>) -> Result<Id> {
            let id = job.id.clone();
            self.jobs.lock().insert(id.as_str().to_string(), job);
            Ok(id)
        }
        async fn dequeue(&self, _routing_keys: &[String]) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn complete(&self, _job_id: &Id) -> Result<()> {
            Ok(())
        }
        async fn fail(&self, _job_id: &Id, _error_message: &str) -> Result<crate::queue::FailOutcome> {
            Ok(crate::queue::FailOutcome::Retried)
        }
        async fn move_scheduled_to_ready(&self) -> Result<u64> {
            Ok(0)
        }
        async fn get_job(&self, job_id: &Id) -> Result<Job> {
            self.jobs
                .lock()
                .get(job_id.as_str())
                .cloned()
                .ok_or_else(|| JobError::JobNotFound(job_id.to_string()))
        }
        async fn queue_depth(&self, _routing_key: &str, _priority: P) -> Result<u64> {
            Ok(0)
        }
        async fn dead_letter_depth(&self) -> Result<u64> {
            Ok(0)
        }
        async fn scheduled_depth(&self) -> Result<u64> {
            Ok(0)
        }
        async fn processing_depth(&self) -> Result<u64> {
            Ok(0)
        }
        async fn reap_stale_leases(&self, _threshold: Duration) -> Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct FakeResults {
        stored: Mutex<HashMap<String, JobOutcome>>,
    }

    #[async_trait]
    impl ResultBackend for FakeResults {
        async fn store(&self, outcome: JobOutcome) -> Result<()> {
            self.stored.lock().insert(outcome.job_id.as_str().to_string(), outcome);
            Ok(())
        }
        async fn get(&self, job_id: &Id) -> Result<Option<JobOutcome>> {
            Ok(self.stored.lock().get(job_id.as_str()).cloned())
        }
        async fn wait(&self, job_id: &Id, _timeout: Duration) -> Result<Option<JobOutcome>> {
            self.get(job_id).await
        }
        async fn delete(&self, job_id: &Id) -> Result<()> {
            self.stored.lock().remove(job_id.as_str());
            Ok(())
        }
    }

    #[tokio::test]
    async fn submit_job_defaults_to_the_default_route() {
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResults::default());
        let metrics = Arc::new(MetricsCollector::new());
        let client = Client::new(queue.clone(), results, metrics);

        client
            .submit_job("echo", Payload::text("hi"), P::Normal, None)
            .await
            .unwrap();

        let enqueued = queue.enqueued.lock();
        assert_eq!(enqueued[0].routing_key, "default");
    }

    #[tokio::test]
    async fn submit_job_with_route_rejects_an_invalid_routing_key_before_enqueue() {
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResults::default());
        let metrics = Arc::new(MetricsCollector::new());
        let client = Client::new(queue.clone(), results, metrics);

        let err = client
            .submit_job_with_route("echo", Payload::text("hi"), P::Normal, "not valid!", None)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidRoutingKey(_)));
        assert!(queue.enqueued.lock().is_empty());
    }

    #[tokio::test]
    async fn submit_and_wait_enqueues_then_returns_the_stored_outcome() {
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResults::default());
        let metrics = Arc::new(MetricsCollector::new());
        let client = Client::new(queue.clone(), results.clone(), metrics);

        let job_id = client
            .submit_job("echo", Payload::text("hi"), P::High, None)
            .await
            .unwrap();
        results
            .store(JobOutcome {
                job_id: job_id.clone(),
                status: crate::result::OutcomeStatus::Completed,
                result: None,
                error: None,
                completed_at: Utc::now(),
                duration: Duration::from_millis(10),
            })
            .await
            .unwrap();

        let outcome = client.get_result(&job_id).await.unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn get_job_surfaces_not_found() {
        let queue = Arc::new(FakeQueue::default());
        let results = Arc::new(FakeResults::default());
        let metrics = Arc::new(MetricsCollector::new());
        let client = Client::new(queue, results, metrics);
        let err = client.get_job(&Id::new()).await.unwrap_err();
        assert!(matches!(err, JobError::JobNotFound(_)));
    }
}
