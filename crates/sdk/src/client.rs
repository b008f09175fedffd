//! Joblane Client Implementation

use crate::error::{Result, SdkError};
use crate::follower::LogFollower;
use crate::types::{
    ActiveJobs, CancelJobResponse, JobStatus, JobSummary, ListJobsResponse, LogPoll,
    RemoveJobResponse, RunJobRequest, RunJobResponse, StatsResponse,
};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Serialize;
use std::time::Duration;

/// Joblane daemon client
///
/// # Example
///
/// ```no_run
/// use joblane_sdk::{JoblaneClient, RunJobRequest};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = JoblaneClient::connect("http://127.0.0.1:9630").await?;
/// let started = client.run(RunJobRequest::new("garak").args(["--probes", "dan"])).await?;
/// let poll = client.poll_logs(&started.job_id, 0).await?;
/// for line in poll.lines {
///     println!("{}", line.text);
/// }
/// # Ok(())
/// # }
/// ```
pub struct JoblaneClient {
    client: HttpClient,
}

/// Serialize a request struct as named params
fn object_params<T: Serialize>(request: &T) -> Result<ObjectParams> {
    let mut params = ObjectParams::new();
    if let serde_json::Value::Object(fields) = serde_json::to_value(request)? {
        for (name, value) in fields {
            params.insert(&name, value)?;
        }
    }
    Ok(params)
}

fn job_params(job_id: &str) -> Result<ObjectParams> {
    let mut params = ObjectParams::new();
    params.insert("job_id", job_id)?;
    Ok(params)
}

impl JoblaneClient {
    /// Connect to the Joblane daemon
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9630`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();

        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self { client })
    }

    /// Start an evaluation job
    pub async fn run(&self, request: RunJobRequest) -> Result<RunJobResponse> {
        let params = object_params(&request)?;
        Ok(self.client.request("jobs.run.v1", params).await?)
    }

    /// Fetch a job's current summary
    pub async fn get(&self, job_id: &str) -> Result<JobSummary> {
        Ok(self.client.request("jobs.get.v1", job_params(job_id)?).await?)
    }

    /// Lines from `cursor` onwards plus the job's status
    ///
    /// Store the returned `next_cursor` and pass it to the next call.
    pub async fn poll_logs(&self, job_id: &str, cursor: u64) -> Result<LogPoll> {
        let mut params = job_params(job_id)?;
        params.insert("cursor", cursor)?;
        Ok(self.client.request("logs.poll.v1", params).await?)
    }

    /// Non-terminal jobs, for reattaching after a restart of the observer
    pub async fn active_jobs(&self) -> Result<ActiveJobs> {
        Ok(self.client.request("jobs.active.v1", rpc_params![]).await?)
    }

    /// Cancel a job (idempotent)
    pub async fn cancel(&self, job_id: &str) -> Result<CancelJobResponse> {
        Ok(self.client.request("jobs.cancel.v1", job_params(job_id)?).await?)
    }

    /// Drop a job and its log (idempotent)
    pub async fn remove(&self, job_id: &str) -> Result<RemoveJobResponse> {
        Ok(self.client.request("jobs.remove.v1", job_params(job_id)?).await?)
    }

    /// List jobs, optionally only those with `status`
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<JobSummary>> {
        let mut params = ObjectParams::new();
        if let Some(status) = status {
            params.insert("status", status)?;
        }
        let response: ListJobsResponse = self.client.request("jobs.list.v1", params).await?;
        Ok(response.jobs)
    }

    /// Registry statistics
    pub async fn stats(&self) -> Result<StatsResponse> {
        Ok(self.client.request("admin.stats.v1", rpc_params![]).await?)
    }

    /// Cursor-tracking follower for one job's log
    pub fn follow(&self, job_id: impl Into<String>) -> LogFollower<'_> {
        LogFollower::new(self, job_id)
    }
}
