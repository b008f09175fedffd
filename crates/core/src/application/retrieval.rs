// Incremental log retrieval (cursor protocol)

use crate::application::registry::JobRegistry;
use crate::application::runner::constants::DEFAULT_POLL_PAGE_SIZE;
use crate::domain::error::Result;
use crate::domain::{JobId, JobStatus, LogLine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Response to one poll: the delta since the caller's cursor plus job status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPoll {
    pub job_id: JobId,
    pub lines: Vec<LogLine>,
    pub next_cursor: u64,
    pub status: JobStatus,
    pub eval_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl LogPoll {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Non-terminal jobs, for observers reconnecting after a page reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJobs {
    pub count: usize,
    pub job_ids: Vec<JobId>,
}

/// Read side of the registry.
///
/// The server keeps no per-observer state: every caller supplies its own
/// cursor and stores the returned `next_cursor`.
pub struct LogRetrieval {
    registry: Arc<JobRegistry>,
    page_size: usize,
}

impl LogRetrieval {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self::with_page_size(registry, DEFAULT_POLL_PAGE_SIZE)
    }

    pub fn with_page_size(registry: Arc<JobRegistry>, page_size: usize) -> Self {
        Self {
            registry,
            page_size: page_size.max(1),
        }
    }

    /// Lines from `cursor` onwards (at most one page) and the job's status.
    ///
    /// Unknown ids fail with `JobNotFound`, distinct from an empty page.
    pub fn poll(&self, job_id: &str, cursor: u64) -> Result<LogPoll> {
        let (job, slice) = self
            .registry
            .read_with_status(job_id, cursor, self.page_size)?;

        Ok(LogPoll {
            job_id: job.id,
            lines: slice.lines,
            next_cursor: slice.next_cursor,
            status: job.status,
            eval_id: job.eval_id,
            result: job.result,
            error: job.error,
        })
    }

    pub fn active_jobs(&self) -> ActiveJobs {
        let job_ids: Vec<JobId> = self
            .registry
            .list_active()
            .into_iter()
            .map(|job| job.id)
            .collect();
        ActiveJobs {
            count: job_ids.len(),
            job_ids,
        }
    }
}
