// Domain Layer - Jobs, statuses and append-only log buffers

pub mod error;
pub mod job;
pub mod log_buffer;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobStatus, JobUpdate, LogLine};
pub use log_buffer::{JobLogBuffer, LogSlice};
