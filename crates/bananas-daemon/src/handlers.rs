//! Illustrative handlers, registered by this binary for its own end-to-end tests. §1 scopes
//! concrete handler implementations out of the core library; these exist only so the daemon
//! has something to run and something its own test suite can assert against.

use bananas_core::{HandlerRegistry, JobContext, JobError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

/// Registers the daemon's demo job names against a registry.
pub fn register_all(registry: &HandlerRegistry) {
    registry.register("echo", echo);
    registry.register("ping", ping);

    let flaky_attempts = Arc::new(AtomicU32::new(0));
    registry.register("flaky", move |ctx, job| {
        let flaky_attempts = flaky_attempts.clone();
        async move { flaky(ctx, job, &flaky_attempts).await }
    });
}

async fn echo(ctx: JobContext, job: bananas_core::Job) -> Result<(), JobError> {
    info!(job_id = %ctx.job_id, name = %job.name, payload = ?job.payload.as_text(), "echo handler ran");
    Ok(())
}

async fn ping(ctx: JobContext, _job: bananas_core::Job) -> Result<(), JobError> {
    info!(job_id = %ctx.job_id, "ping handler ran");
    Ok(())
}

/// Fails on its first two attempts, succeeds from the third on — used by the retry/dead-
/// letter end-to-end scenarios in `tests/`.
async fn flaky(
    ctx: JobContext,
    _job: bananas_core::Job,
    attempts: &AtomicU32,
) -> Result<(), JobError> {
    let n = attempts.fetch_add(1, Ordering::SeqCst);
    if n < 2 {
        return Err(JobError::Internal(format!("flaky handler failed on attempt {n}")));
    }
    info!(job_id = %ctx.job_id, attempt = n, "flaky handler succeeded");
    Ok(())
}
