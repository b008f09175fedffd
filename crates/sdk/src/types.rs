//! SDK Request/Response Types
//!
//! Mirrors the JSON-RPC types served by the daemon.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to start an evaluation job
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunJobRequest {
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RunJobRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Job summary
#[derive(Debug, Clone, Deserialize)]
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

/// One captured log line
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogLine {
    pub sequence_number: u64,
    pub text: String,
}

/// Response to one log poll
#[derive(Debug, Clone, Deserialize)]
pub struct LogPoll {
    pub job_id: String,
    pub lines: Vec<LogLine>,
    pub next_cursor: u64,
    pub status: JobStatus,
    pub eval_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveJobs {
    pub count: usize,
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    pub cancelled: bool,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveJobResponse {
    pub job_id: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListJobsResponse {
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Clone, Deserialize)]
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
