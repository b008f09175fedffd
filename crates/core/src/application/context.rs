//! Execution context propagation
//!
//! Binds the currently running unit of work to a job id. The binding lives in
//! tokio task-local storage attached to the job's future, so it survives every
//! suspension point and is restored whenever the future is polled again.
//! Concurrent jobs each carry their own binding; releasing one (completion,
//! error, panic, or the future being dropped on cancellation) never touches
//! another.

use crate::domain::JobId;
use std::future::Future;
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT_JOB: JobId;
}

/// Run `work` with its execution context bound to `job_id`.
///
/// Nested calls with a different id shadow the outer binding for the duration
/// of the inner future only.
pub async fn run_with_context<F, T>(job_id: impl Into<JobId>, work: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_JOB.scope(job_id.into(), work).await
}

/// Synchronous variant for blocking sections (e.g. inside `spawn_blocking`).
pub fn run_with_context_sync<F, T>(job_id: impl Into<JobId>, work: F) -> T
where
    F: FnOnce() -> T,
{
    CURRENT_JOB.sync_scope(job_id.into(), work)
}

/// The job id bound to the calling unit of work, if any
pub fn current_job_id() -> Option<JobId> {
    CURRENT_JOB.try_with(|id| id.clone()).ok()
}

/// Spawn a sub-task that inherits the caller's binding.
///
/// `tokio::spawn` starts a fresh task with no task-locals; work a job launches
/// in the background should go through here so its lines stay attributed to
/// the job.
pub fn spawn_in_context<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_job_id() {
        Some(job_id) => tokio::spawn(CURRENT_JOB.scope(job_id, future)),
        None => tokio::spawn(future),
    }
}
