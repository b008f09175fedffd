// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4 in production)
pub type JobId = String;

/// Job Status
///
/// Transitions are monotonic: `pending -> running -> {complete | error | cancelled}`.
/// A pending job may also be cancelled or fail before it ever runs.
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
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Complete,
        JobStatus::Error,
        JobStatus::Cancelled,
    ];

    /// Terminal statuses admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Error)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Cancelled)
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

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::ValidationError(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}

/// One captured log line. The sequence number is assigned by the owning buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub sequence_number: u64,
    pub text: String,
}

/// Job Entity (snapshot of a registry entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,

    /// Opaque payload, set only on `complete`
    pub result: Option<serde_json::Value>,
    /// External evaluation id, set only on `complete`
    pub eval_id: Option<String>,
    /// Failure message, set only on `error`
    pub error: Option<String>,

    /// Number of lines in the job's log buffer when the snapshot was taken
    #[serde(default)]
    pub log_count: u64,
}

/// Partial update merged into a job by the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<serde_json::Value>,
    pub eval_id: Option<String>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn complete(result: Option<serde_json::Value>, eval_id: Option<String>) -> Self {
        Self {
            status: Some(JobStatus::Complete),
            result,
            eval_id,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::status(JobStatus::Cancelled)
    }
}

impl Job {
    /// Create a new pending Job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            eval_id: None,
            error: None,
            log_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge an update into this job.
    ///
    /// The update is validated as a whole before anything is written, so a
    /// rejected update leaves the job untouched.
    pub fn apply(&mut self, update: JobUpdate, now_millis: i64) -> Result<()> {
        let target = update.status.unwrap_or(self.status);

        if self.status.is_terminal() {
            return Err(DomainError::TerminalStateViolation {
                job_id: self.id.clone(),
                current: self.status,
                attempted: target,
            });
        }

        if let Some(next) = update.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(DomainError::InvalidStateTransition {
                    from: self.status,
                    to: next,
                });
            }
        }

        if (update.result.is_some() || update.eval_id.is_some()) && target != JobStatus::Complete {
            return Err(DomainError::ValidationError(
                "result and eval_id can only be set on completion".to_string(),
            ));
        }

        if update.error.is_some() && target != JobStatus::Error {
            return Err(DomainError::ValidationError(
                "error message can only be set on failure".to_string(),
            ));
        }

        if target != self.status {
            match target {
                JobStatus::Running => self.started_at = Some(now_millis),
                s if s.is_terminal() => self.completed_at = Some(now_millis),
                _ => {}
            }
            self.status = target;
        }

        if update.result.is_some() {
            self.result = update.result;
        }
        if update.eval_id.is_some() {
            self.eval_id = update.eval_id;
        }
        if update.error.is_some() {
            self.error = update.error;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_happy_path_sets_timestamps_once() {
        let mut job = Job::new("j1", 1000);
        job.apply(JobUpdate::status(JobStatus::Running), 2000).unwrap();
        assert_eq!(job.started_at, Some(2000));
        assert_eq!(job.completed_at, None);

        job.apply(
            JobUpdate::complete(Some(json!({"score": 0.9})), Some("eval-7".into())),
            3000,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.completed_at, Some(3000));
        assert_eq!(job.eval_id.as_deref(), Some("eval-7"));
    }

    #[test]
    fn test_terminal_is_write_once() {
        let mut job = Job::new("j1", 0);
        job.apply(JobUpdate::status(JobStatus::Running), 1).unwrap();
        job.apply(JobUpdate::complete(Some(json!(1)), Some("e1".into())), 2)
            .unwrap();

        let err = job
            .apply(JobUpdate::complete(Some(json!(2)), Some("e2".into())), 3)
            .unwrap_err();
        assert!(matches!(err, DomainError::TerminalStateViolation { .. }));
        assert_eq!(job.result, Some(json!(1)));
        assert_eq!(job.eval_id.as_deref(), Some("e1"));
        assert_eq!(job.completed_at, Some(2));
    }

    #[test]
    fn test_error_then_complete_rejected() {
        let mut job = Job::new("j1", 0);
        job.apply(JobUpdate::status(JobStatus::Running), 1).unwrap();
        job.apply(JobUpdate::failed("boom"), 2).unwrap();

        let result = job.apply(JobUpdate::status(JobStatus::Complete), 3);
        assert!(result.is_err());
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut job = Job::new("j1", 0);
        let err = job
            .apply(JobUpdate::status(JobStatus::Complete), 1)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_result_outside_completion_rejected_without_partial_write() {
        let mut job = Job::new("j1", 0);
        let update = JobUpdate {
            status: Some(JobStatus::Running),
            eval_id: Some("early".into()),
            ..Default::default()
        };
        assert!(job.apply(update, 1).is_err());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.eval_id.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_status_roundtrip_from_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }
}
