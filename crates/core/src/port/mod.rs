// Port Layer - Interfaces for external dependencies

pub mod cancel;
pub mod id_provider; // For deterministic testing
pub mod job_work;
pub mod time_provider;

// Re-exports
pub use cancel::{cancel_channel, CancelHandle, CancelToken};
pub use id_provider::IdProvider;
pub use job_work::{ExecutionError, JobWork, RunRequest, WorkOutcome};
pub use time_provider::TimeProvider;
