//! The Handler Registry: a process-local map from job name to handler function.

use crate::error::JobError;
use crate::job::{Job, JobId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Carries everything a handler needs about the attempt it is running under. The deadline
/// is informational — the Worker Pool enforces it via `tokio::time::timeout` around the
/// handler call, not by the handler polling this struct.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub attempt: u32,
    pub max_retries: u32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

/// A job handler: takes the context and the job, returns ok or an error message.
pub type Handler =
    Arc<dyn Fn(JobContext, Job) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Process-local, write-frozen-after-startup map from job name to handler. No concurrent
/// mutation is expected once workers start; `parking_lot::RwLock` costs nothing on the read
/// path that matters (one lookup per dequeued job).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `name`. Last-writer-wins on a repeated name.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let name = name.into();
        let boxed: Handler = Arc::new(move |ctx, job| Box::pin(handler(ctx, job)));
        self.handlers.write().insert(name, boxed);
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.read().get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;

    #[tokio::test]
    async fn register_then_get_dispatches_to_the_registered_handler() {
        let registry = HandlerRegistry::new();
        registry.register("echo", |_ctx, job| async move {
            assert_eq!(job.name, "echo");
            Ok(())
        });

        let handler = registry.get("echo").expect("handler should be present");
        let ctx = JobContext {
            job_id: JobId::new(),
            attempt: 1,
            max_retries: 3,
            worker_id: "w1".to_string(),
            started_at: Utc::now(),
            correlation_id: None,
        };
        let job = Job::new("echo", Payload::text("hi"));
        assert!(handler(ctx, job).await.is_ok());
    }

    #[test]
    fn get_returns_none_for_unregistered_name() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn count_reflects_registrations() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.count(), 0);
        registry.register("a", |_ctx, _job| async { Ok(()) });
        registry.register("b", |_ctx, _job| async { Ok(()) });
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn last_writer_wins_on_duplicate_name() {
        let registry = HandlerRegistry::new();
        registry.register("dup", |_ctx, _job| async { Ok(()) });
        registry.register("dup", |_ctx, _job| async { Err(JobError::Internal("v2".into())) });
        assert_eq!(registry.count(), 1);
    }
}
