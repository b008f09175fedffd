//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use joblane_core::domain::{Job, JobStatus};
use joblane_core::port::RunRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// jobs.run.v1 - Start an evaluation job
#[derive(Debug, Deserialize)]
pub struct RunJobRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<RunJobRequest> for RunRequest {
    fn from(req: RunJobRequest) -> Self {
        RunRequest {
            command: req.command,
            args: req.args,
            env: req.env,
            working_dir: req.working_dir,
            timeout_ms: req.timeout_ms,
            description: req.description,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Any method addressing a single job (jobs.get.v1, jobs.cancel.v1, jobs.remove.v1)
#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    pub job_id: String,
}

/// Job summary returned by jobs.get.v1 and jobs.list.v1
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub eval_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub log_count: u64,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            eval_id: job.eval_id,
            result: job.result,
            error: job.error,
            log_count: job.log_count,
        }
    }
}

/// logs.poll.v1 - Lines since the caller's cursor
#[derive(Debug, Deserialize)]
pub struct PollLogsRequest {
    pub job_id: String,
    #[serde(default)]
    pub cursor: u64,
}

/// jobs.active.v1 / admin.stats.v1 - no parameters
#[derive(Debug, Default, Deserialize)]
pub struct EmptyRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    /// False when the job had already finished
    pub cancelled: bool,
    /// Status at reply time; may still be `running` while the work stops
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveJobResponse {
    pub job_id: String,
    pub removed: bool,
}

/// jobs.list.v1 - List jobs, optionally filtered by status
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsRequest {
    #[serde(default)]
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSummary>,
}

/// admin.stats.v1 - Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub running_jobs: usize,
    pub complete_jobs: usize,
    pub error_jobs: usize,
    pub cancelled_jobs: usize,
    pub in_flight: usize,
    pub uptime_seconds: u64,
}
