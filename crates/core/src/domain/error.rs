// Domain Error Types

use crate::domain::job::{JobId, JobStatus};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Job {job_id} is already {current}, rejected update to {attempted}")]
    TerminalStateViolation {
        job_id: JobId,
        current: JobStatus,
        attempted: JobStatus,
    },

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobStatus, to: JobStatus },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
