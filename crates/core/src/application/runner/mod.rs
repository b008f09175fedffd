// Job Runner - drives job work inside its execution context

pub mod constants;

use crate::application::context::{run_with_context, run_with_context_sync};
use crate::application::log_sink::LogSink;
use crate::application::registry::JobRegistry;
use crate::domain::{DomainError, Job, JobId, JobStatus, JobUpdate};
use crate::error::{AppError, Result};
use crate::port::{
    cancel_channel, CancelHandle, CancelToken, ExecutionError, IdProvider, JobWork, RunRequest,
};
use constants::CANCEL_GRACE_PERIOD;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

// Job panics are caught through the JoinHandle, which needs unwinding
#[cfg(not(panic = "unwind"))]
compile_error!("joblane-core requires panic = \"unwind\"");

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was requested; the job records `cancelled` once its work has stopped
    Cancelled,
    /// Nothing to do: the job had already finished with this status
    AlreadyTerminal(JobStatus),
}

struct RunnerInner {
    registry: Arc<JobRegistry>,
    sink: LogSink,
    id_provider: Arc<dyn IdProvider>,
    permits: Arc<Semaphore>,
    cancel_handles: Mutex<HashMap<JobId, CancelHandle>>,
    cancel_grace: Duration,
}

impl RunnerInner {
    fn handles(&self) -> MutexGuard<'_, HashMap<JobId, CancelHandle>> {
        self.cancel_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, job_id: &str) {
        self.handles().remove(job_id);
    }
}

/// Job Runner
///
/// Each accepted job gets a registry entry, a cancel channel and a tokio task.
/// The work itself runs in a nested task wrapped in `run_with_context`, so the
/// binding is released whenever that task ends (normally, by error, by panic,
/// or by being aborted) without touching any other job's binding.
///
/// Only the driving task writes a job's terminal status, and only after the
/// work task has finished. Every line the work appends is therefore in the
/// buffer before an observer can see a terminal status.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        id_provider: Arc<dyn IdProvider>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self::with_cancel_grace(registry, id_provider, max_concurrent_jobs, CANCEL_GRACE_PERIOD)
    }

    pub fn with_cancel_grace(
        registry: Arc<JobRegistry>,
        id_provider: Arc<dyn IdProvider>,
        max_concurrent_jobs: usize,
        cancel_grace: Duration,
    ) -> Self {
        let sink = LogSink::new(Arc::clone(&registry));
        Self {
            inner: Arc::new(RunnerInner {
                registry,
                sink,
                id_provider,
                permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                cancel_handles: Mutex::new(HashMap::new()),
                cancel_grace,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn sink(&self) -> &LogSink {
        &self.inner.sink
    }

    /// Number of accepted jobs whose task has not finished yet
    pub fn in_flight(&self) -> usize {
        self.inner.handles().len()
    }

    /// Accept a job and start it in the background. Must be called from a tokio runtime.
    ///
    /// Returns as soon as the job is registered (status `pending`); it moves to
    /// `running` once a concurrency slot is free.
    pub fn start(&self, work: Arc<dyn JobWork>, request: RunRequest) -> Result<JobId> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let job_id = self.inner.id_provider.generate_id();
        self.inner.registry.create(job_id.clone())?;

        let (handle, token) = cancel_channel();
        self.inner.handles().insert(job_id.clone(), handle);

        info!(job_id = %job_id, command = %request.command, "Job accepted");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(Self::drive(inner, job_id.clone(), work, request, token));

        Ok(job_id)
    }

    async fn drive(
        inner: Arc<RunnerInner>,
        job_id: JobId,
        work: Arc<dyn JobWork>,
        request: RunRequest,
        mut token: CancelToken,
    ) {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&inner.permits).acquire_owned() => Some(permit),
        };
        let _permit = match permit {
            Some(Ok(permit)) if !token.is_cancelled() => permit,
            Some(Err(_)) if !token.is_cancelled() => {
                Self::finish(&inner, &job_id, JobUpdate::failed("runner is shutting down"));
                return;
            }
            _ => {
                debug!(job_id = %job_id, "Job cancelled while pending");
                Self::finish(&inner, &job_id, JobUpdate::cancelled());
                return;
            }
        };

        if let Err(e) = inner
            .registry
            .update(&job_id, JobUpdate::status(JobStatus::Running))
        {
            debug!(job_id = %job_id, error = %e, "Job not started");
            inner.forget(&job_id);
            return;
        }
        info!(job_id = %job_id, "Job started");

        let mut execution = {
            let sink = inner.sink.clone();
            let id = job_id.clone();
            let work_token = token.clone();
            tokio::spawn(run_with_context(job_id.clone(), async move {
                sink.emit(format!("job started: {}", request.summary()));
                let outcome = work.execute(&id, &request, work_token).await;
                match &outcome {
                    Ok(_) => sink.emit("job completed"),
                    Err(ExecutionError::Cancelled) => sink.emit("job cancelled"),
                    Err(e) => sink.emit(format!("job failed: {}", e)),
                };
                outcome
            }))
        };

        let joined = tokio::select! {
            joined = &mut execution => Some(joined),
            _ = token.cancelled() => None,
        };

        let update = match joined {
            Some(Ok(Ok(outcome))) => JobUpdate::complete(outcome.result, outcome.eval_id),
            Some(Ok(Err(ExecutionError::Cancelled))) => JobUpdate::cancelled(),
            Some(Ok(Err(e))) => JobUpdate::failed(e.to_string()),
            Some(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!(job_id = %job_id, panic_msg = %message, "Job panicked");
                run_with_context_sync(job_id.as_str(), || {
                    inner.sink.emit(format!("job panicked: {}", message))
                });
                JobUpdate::failed(format!("job panicked: {}", message))
            }
            Some(Err(_)) => JobUpdate::cancelled(),
            None => {
                let stopped = tokio::time::timeout(inner.cancel_grace, &mut execution).await;
                match stopped {
                    Ok(Err(join_err)) if join_err.is_panic() => {
                        warn!(job_id = %job_id, "Job panicked while stopping")
                    }
                    Ok(_) => {}
                    Err(_) => {
                        warn!(job_id = %job_id, "Cancelled job did not stop in time, aborting");
                        execution.abort();
                        // The aborted task may still be mid-poll on another worker
                        if let Err(e) = execution.await {
                            debug!(job_id = %job_id, error = %e, "Aborted job task joined");
                        }
                        run_with_context_sync(job_id.as_str(), || {
                            inner.sink.emit(format!(
                                "job aborted after {:?} cancel grace period",
                                inner.cancel_grace
                            ))
                        });
                    }
                }
                JobUpdate::cancelled()
            }
        };

        Self::finish(&inner, &job_id, update);
    }

    /// Record the terminal status and release the job's cancel handle
    fn finish(inner: &RunnerInner, job_id: &str, update: JobUpdate) {
        match inner.registry.update(job_id, update) {
            Ok(job) => info!(job_id = %job_id, status = %job.status, "Job finished"),
            Err(DomainError::TerminalStateViolation { current, .. }) => {
                debug!(job_id = %job_id, status = %current, "Job outcome already recorded")
            }
            Err(e) => debug!(job_id = %job_id, error = %e, "Job outcome not recorded"),
        }
        inner.forget(job_id);
    }

    /// Request cooperative cancellation.
    ///
    /// Signals the job's work and returns; the status becomes `cancelled` once
    /// the work has stopped (or been aborted after the cancel grace period).
    /// Repeating the request is a no-op. Cancelling a job that already finished
    /// reports its final status.
    pub fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let job = self.inner.registry.get(job_id)?;
        if job.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(job.status));
        }

        let first_request = {
            let handles = self.inner.handles();
            match handles.get(job_id) {
                Some(handle) => {
                    let first = !handle.is_cancelled();
                    if first {
                        run_with_context_sync(job_id, || {
                            self.inner.sink.emit("cancellation requested")
                        });
                        handle.cancel();
                    }
                    Some(first)
                }
                None => None,
            }
        };

        match first_request {
            Some(true) => {
                info!(job_id = %job_id, "Job cancellation requested");
                Ok(CancelOutcome::Cancelled)
            }
            Some(false) => Ok(CancelOutcome::Cancelled),
            // Not driven by this runner (or its task just finished): record directly
            None => match self.inner.registry.update(job_id, JobUpdate::cancelled()) {
                Ok(_) => {
                    info!(job_id = %job_id, "Job cancelled");
                    Ok(CancelOutcome::Cancelled)
                }
                Err(DomainError::TerminalStateViolation { current, .. }) => {
                    Ok(CancelOutcome::AlreadyTerminal(current))
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Stop the job if it is still running and drop it from the registry
    pub fn remove(&self, job_id: &str) -> bool {
        if let Some(handle) = self.inner.handles().remove(job_id) {
            handle.cancel();
        }
        self.inner.registry.remove(job_id)
    }

    /// Cancel every non-terminal job; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        self.inner
            .registry
            .list_active()
            .iter()
            .filter(|job| matches!(self.cancel(&job.id), Ok(CancelOutcome::Cancelled)))
            .count()
    }

    /// Refuse new executions and cancel everything in flight
    pub fn shutdown(&self) -> usize {
        let cancelled = self.cancel_all();
        self.inner.permits.close();
        cancelled
    }

    /// Poll the registry until the job reaches a terminal status
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Result<Job> {
        let wait = async {
            loop {
                let job = self.inner.registry.get(job_id)?;
                if job.is_terminal() {
                    return Ok(job);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Internal(format!(
                "Job {} did not finish within {:?}",
                job_id, timeout
            ))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::job_work::mocks::{MockBehavior, ScriptedWork};
    use crate::port::time_provider::SystemTimeProvider;

    const WAIT: Duration = Duration::from_secs(5);

    fn runner(max_concurrent: usize) -> JobRunner {
        let registry = Arc::new(JobRegistry::new(Arc::new(SystemTimeProvider)));
        JobRunner::with_cancel_grace(
            registry,
            Arc::new(SequentialIdProvider::new("job")),
            max_concurrent,
            Duration::from_millis(200),
        )
    }

    fn texts(runner: &JobRunner, job_id: &str) -> Vec<String> {
        runner
            .registry()
            .read_from(job_id, 0)
            .unwrap()
            .lines
            .into_iter()
            .map(|l| l.text)
            .collect()
    }

    #[tokio::test]
    async fn test_successful_job_records_outcome_and_lines() {
        let runner = runner(2);
        let work = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec!["probe 1".into(), "probe 2".into()],
            MockBehavior::Succeed {
                eval_id: Some("eval-42".into()),
            },
        ));

        let job_id = runner
            .start(work.clone(), RunRequest::new("redteam").with_args(["eval"]))
            .unwrap();
        let job = runner.wait_for_terminal(&job_id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.eval_id.as_deref(), Some("eval-42"));
        assert!(job.completed_at.is_some());
        assert_eq!(
            texts(&runner, &job_id),
            vec![
                "job started: redteam eval",
                "probe 1",
                "probe 2",
                "job completed"
            ]
        );
        assert_eq!(work.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let runner = runner(2);
        let work = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec!["loading config".into()],
            MockBehavior::Fail("provider unreachable".into()),
        ));

        let job_id = runner.start(work, RunRequest::new("redteam")).unwrap();
        let job = runner.wait_for_terminal(&job_id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("provider unreachable"));
        assert!(job.eval_id.is_none());
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let runner = runner(2);
        let panicking = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec![],
            MockBehavior::Panic("plugin exploded".into()),
        ));
        let healthy = Arc::new(ScriptedWork::succeeding(runner.sink().clone(), &["fine"]));

        let bad = runner.start(panicking, RunRequest::new("bad")).unwrap();
        let good = runner.start(healthy, RunRequest::new("good")).unwrap();

        let bad_job = runner.wait_for_terminal(&bad, WAIT).await.unwrap();
        let good_job = runner.wait_for_terminal(&good, WAIT).await.unwrap();

        assert_eq!(bad_job.status, JobStatus::Error);
        assert!(bad_job.error.unwrap().contains("plugin exploded"));
        assert_eq!(good_job.status, JobStatus::Complete);
        assert!(texts(&runner, &bad)
            .iter()
            .any(|l| l.contains("job panicked: plugin exploded")));
    }

    #[tokio::test]
    async fn test_cancel_running_job_is_idempotent() {
        let runner = runner(2);
        let work = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec![],
            MockBehavior::UntilCancelled,
        ));

        let job_id = runner.start(work, RunRequest::new("long")).unwrap();
        while runner.registry().get(&job_id).unwrap().status != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(runner.cancel(&job_id).unwrap(), CancelOutcome::Cancelled);
        // Still stopping: a repeated request changes nothing
        assert_eq!(runner.cancel(&job_id).unwrap(), CancelOutcome::Cancelled);

        let job = runner.wait_for_terminal(&job_id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(
            runner.cancel(&job_id).unwrap(),
            CancelOutcome::AlreadyTerminal(JobStatus::Cancelled)
        );
        let requested = texts(&runner, &job_id)
            .iter()
            .filter(|l| *l == "cancellation requested")
            .count();
        assert_eq!(requested, 1);

        // Task cleanup is asynchronous; the handle goes away once it finishes
        tokio::time::timeout(WAIT, async {
            while runner.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_status_follows_the_last_line() {
        let runner = runner(2);
        let work = Arc::new(
            ScriptedWork::new(
                runner.sink().clone(),
                vec![],
                MockBehavior::WindDown(vec!["flushing report".into(), "closing target".into()]),
            )
            .with_delay(Duration::from_millis(20)),
        );

        let job_id = runner.start(work, RunRequest::new("long")).unwrap();
        while runner.registry().get(&job_id).unwrap().status != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runner.cancel(&job_id).unwrap(), CancelOutcome::Cancelled);
        assert!(!runner.registry().get(&job_id).unwrap().is_terminal());

        // Observer: poll until terminal, then drain until an empty page
        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (job, slice) = runner
                .registry()
                .read_with_status(&job_id, cursor, 1000)
                .unwrap();
            let empty = slice.lines.is_empty();
            cursor = slice.next_cursor;
            seen.extend(slice.lines.into_iter().map(|l| l.text));
            if job.is_terminal() && empty {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = runner.registry().read_from(&job_id, cursor).unwrap();
        assert!(late.lines.is_empty(), "lines after drain: {:?}", late.lines);
        assert_eq!(
            seen[seen.len() - 3..],
            ["flushing report", "closing target", "job cancelled"]
        );
    }

    #[tokio::test]
    async fn test_work_ignoring_cancel_is_aborted_before_status_is_recorded() {
        let runner = runner(2);
        let work = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec![],
            MockBehavior::IgnoreCancel,
        ));

        let job_id = runner.start(work, RunRequest::new("stubborn")).unwrap();
        while runner.registry().get(&job_id).unwrap().status != JobStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        runner.cancel(&job_id).unwrap();

        let job = runner.wait_for_terminal(&job_id, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let lines = texts(&runner, &job_id);
        assert!(lines
            .last()
            .is_some_and(|l| l.starts_with("job aborted after")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(texts(&runner, &job_id).len(), lines.len());
    }

    #[tokio::test]
    async fn test_cancel_pending_job_records_cancelled() {
        let runner = runner(1);
        let blocker = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec![],
            MockBehavior::UntilCancelled,
        ));
        let queued = Arc::new(ScriptedWork::succeeding(runner.sink().clone(), &["never"]));

        let first = runner.start(blocker, RunRequest::new("blocker")).unwrap();
        let second = runner.start(queued.clone(), RunRequest::new("queued")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(runner.cancel(&second).unwrap(), CancelOutcome::Cancelled);
        let job = runner.wait_for_terminal(&second, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_none());
        assert_eq!(queued.call_count(), 0);

        runner.cancel(&first).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_not_found() {
        let runner = runner(1);
        let err = runner.cancel("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrency_limit_keeps_second_job_pending() {
        let runner = runner(1);
        let blocker = Arc::new(ScriptedWork::new(
            runner.sink().clone(),
            vec![],
            MockBehavior::UntilCancelled,
        ));
        let quick = Arc::new(ScriptedWork::succeeding(runner.sink().clone(), &["quick"]));

        let first = runner.start(blocker, RunRequest::new("blocker")).unwrap();
        let second = runner.start(quick, RunRequest::new("quick")).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            runner.registry().get(&second).unwrap().status,
            JobStatus::Pending
        );

        runner.cancel(&first).unwrap();
        let job = runner.wait_for_terminal(&second, WAIT).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_registration() {
        let runner = runner(1);
        let work = Arc::new(ScriptedWork::succeeding(runner.sink().clone(), &[]));
        let err = runner.start(work, RunRequest::new("  ")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(runner.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let runner = runner(4);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let work = Arc::new(ScriptedWork::new(
                runner.sink().clone(),
                vec![],
                MockBehavior::UntilCancelled,
            ));
            ids.push(runner.start(work, RunRequest::new("long")).unwrap());
        }

        assert_eq!(runner.shutdown(), 3);
        for id in ids {
            let job = runner.wait_for_terminal(&id, WAIT).await.unwrap();
            assert_eq!(job.status, JobStatus::Cancelled);
        }
    }
}
