//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{from_domain, to_rpc_error};
use crate::types::{
    CancelJobResponse, EmptyRequest, JobIdRequest, JobSummary, ListJobsRequest, ListJobsResponse,
    PollLogsRequest, RemoveJobResponse, RunJobRequest, RunJobResponse, StatsResponse,
};
use joblane_core::application::{ActiveJobs, CancelOutcome, JobRunner, LogPoll, LogRetrieval};
use joblane_core::domain::JobStatus;
use joblane_core::port::JobWork;
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::debug;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    runner: JobRunner,
    retrieval: Arc<LogRetrieval>,
    work: Arc<dyn JobWork>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(runner: JobRunner, retrieval: Arc<LogRetrieval>, work: Arc<dyn JobWork>) -> Self {
        Self {
            runner,
            retrieval,
            work,
            start_time: std::time::Instant::now(),
        }
    }

    /// jobs.run.v1
    pub async fn run(&self, params: RunJobRequest) -> Result<RunJobResponse, ErrorObjectOwned> {
        let job_id = self
            .runner
            .start(Arc::clone(&self.work), params.into())
            .map_err(to_rpc_error)?;

        // The job may already have moved on (or been removed) by now
        let status = self
            .runner
            .registry()
            .get(&job_id)
            .map(|job| job.status)
            .unwrap_or(JobStatus::Pending);

        Ok(RunJobResponse { job_id, status })
    }

    /// jobs.get.v1
    pub async fn get(&self, params: JobIdRequest) -> Result<JobSummary, ErrorObjectOwned> {
        self.runner
            .registry()
            .get(&params.job_id)
            .map(JobSummary::from)
            .map_err(from_domain)
    }

    /// logs.poll.v1
    pub async fn poll_logs(&self, params: PollLogsRequest) -> Result<LogPoll, ErrorObjectOwned> {
        let poll = self
            .retrieval
            .poll(&params.job_id, params.cursor)
            .map_err(from_domain)?;
        debug!(
            job_id = %params.job_id,
            cursor = params.cursor,
            lines = poll.lines.len(),
            status = %poll.status,
            "Log poll"
        );
        Ok(poll)
    }

    /// jobs.active.v1
    pub async fn active(&self, _params: EmptyRequest) -> Result<ActiveJobs, ErrorObjectOwned> {
        Ok(self.retrieval.active_jobs())
    }

    /// jobs.cancel.v1
    ///
    /// Reports the status at reply time; a running job turns `cancelled` once its work stops.
    pub async fn cancel(&self, params: JobIdRequest) -> Result<CancelJobResponse, ErrorObjectOwned> {
        let outcome = self.runner.cancel(&params.job_id).map_err(to_rpc_error)?;
        let (cancelled, status) = match outcome {
            CancelOutcome::Cancelled => {
                let job = self
                    .runner
                    .registry()
                    .get(&params.job_id)
                    .map_err(from_domain)?;
                (true, job.status)
            }
            CancelOutcome::AlreadyTerminal(status) => (false, status),
        };
        Ok(CancelJobResponse {
            job_id: params.job_id,
            cancelled,
            status,
        })
    }

    /// jobs.remove.v1
    ///
    /// Idempotent: removing an unknown or already removed job reports `removed: false`.
    pub async fn remove(&self, params: JobIdRequest) -> Result<RemoveJobResponse, ErrorObjectOwned> {
        let removed = self.runner.remove(&params.job_id);
        Ok(RemoveJobResponse {
            job_id: params.job_id,
            removed,
        })
    }

    /// jobs.list.v1
    pub async fn list(&self, params: ListJobsRequest) -> Result<ListJobsResponse, ErrorObjectOwned> {
        let registry = self.runner.registry();
        let jobs = match params.status {
            Some(status) => registry.list_by_status(status),
            None => registry.list_all(),
        };
        Ok(ListJobsResponse {
            jobs: jobs.into_iter().map(JobSummary::from).collect(),
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: EmptyRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let counts = self.runner.registry().status_counts();
        Ok(StatsResponse {
            total_jobs: counts.total(),
            pending_jobs: counts.pending,
            running_jobs: counts.running,
            complete_jobs: counts.complete,
            error_jobs: counts.error,
            cancelled_jobs: counts.cancelled,
            in_flight: self.runner.in_flight(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use joblane_core::application::JobRegistry;
    use joblane_core::port::id_provider::SequentialIdProvider;
    use joblane_core::port::job_work::mocks::{MockBehavior, ScriptedWork};
    use joblane_core::port::time_provider::SystemTimeProvider;
    use std::time::Duration;

    fn handler_with(behavior: MockBehavior) -> RpcHandler {
        let registry = Arc::new(JobRegistry::new(Arc::new(SystemTimeProvider)));
        let runner = JobRunner::new(
            Arc::clone(&registry),
            Arc::new(SequentialIdProvider::new("job")),
            4,
        );
        let work = ScriptedWork::new(
            runner.sink().clone(),
            vec!["probe 1".to_string(), "probe 2".to_string()],
            behavior,
        );
        RpcHandler::new(
            runner,
            Arc::new(LogRetrieval::new(registry)),
            Arc::new(work),
        )
    }

    fn run_request() -> RunJobRequest {
        RunJobRequest {
            command: "garak".to_string(),
            args: vec!["--probes".to_string(), "dan".to_string()],
            env: Default::default(),
            working_dir: None,
            timeout_ms: None,
            description: None,
        }
    }

    async fn wait_terminal(handler: &RpcHandler, job_id: &str) {
        handler
            .runner
            .wait_for_terminal(job_id, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_then_poll() {
        let handler = handler_with(MockBehavior::Succeed {
            eval_id: Some("eval-7".to_string()),
        });
        let started = handler.run(run_request()).await.unwrap();
        assert_eq!(started.job_id, "job-1");
        wait_terminal(&handler, &started.job_id).await;

        let poll = handler
            .poll_logs(PollLogsRequest {
                job_id: started.job_id.clone(),
                cursor: 0,
            })
            .await
            .unwrap();
        assert_eq!(poll.status, JobStatus::Complete);
        assert_eq!(poll.eval_id.as_deref(), Some("eval-7"));
        let texts: Vec<_> = poll.lines.iter().map(|l| l.text.as_str()).collect();
        assert!(texts.contains(&"probe 1"));
        assert!(texts.contains(&"probe 2"));

        let drain = handler
            .poll_logs(PollLogsRequest {
                job_id: started.job_id,
                cursor: poll.next_cursor,
            })
            .await
            .unwrap();
        assert!(drain.lines.is_empty());
        assert_eq!(drain.next_cursor, poll.next_cursor);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let handler = handler_with(MockBehavior::Succeed { eval_id: None });
        let err = handler
            .poll_logs(PollLogsRequest {
                job_id: "missing".to_string(),
                cursor: 0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);

        let err = handler
            .get(JobIdRequest {
                job_id: "missing".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_command_is_validation_error() {
        let handler = handler_with(MockBehavior::Succeed { eval_id: None });
        let mut request = run_request();
        request.command = "  ".to_string();
        let err = handler.run(request).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let handler = handler_with(MockBehavior::UntilCancelled);
        let started = handler.run(run_request()).await.unwrap();

        let first = handler
            .cancel(JobIdRequest {
                job_id: started.job_id.clone(),
            })
            .await
            .unwrap();
        assert!(first.cancelled);
        assert!(matches!(
            first.status,
            JobStatus::Pending | JobStatus::Running | JobStatus::Cancelled
        ));
        wait_terminal(&handler, &started.job_id).await;

        let second = handler
            .cancel(JobIdRequest {
                job_id: started.job_id.clone(),
            })
            .await
            .unwrap();
        assert!(!second.cancelled);
        assert_eq!(second.status, JobStatus::Cancelled);

        let active = handler.active(EmptyRequest {}).await.unwrap();
        assert_eq!(active.count, 0);
    }

    #[tokio::test]
    async fn test_remove_list_and_stats() {
        let handler = handler_with(MockBehavior::Fail("target unreachable".to_string()));
        let a = handler.run(run_request()).await.unwrap().job_id;
        let b = handler.run(run_request()).await.unwrap().job_id;
        wait_terminal(&handler, &a).await;
        wait_terminal(&handler, &b).await;

        let failed = handler
            .list(ListJobsRequest {
                status: Some(JobStatus::Error),
            })
            .await
            .unwrap();
        assert_eq!(failed.jobs.len(), 2);
        assert!(failed.jobs[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("target unreachable")));

        let removed = handler
            .remove(JobIdRequest { job_id: a.clone() })
            .await
            .unwrap();
        assert!(removed.removed);
        let again = handler.remove(JobIdRequest { job_id: a }).await.unwrap();
        assert!(!again.removed);

        let stats = handler.stats(EmptyRequest {}).await.unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.error_jobs, 1);
    }
}
