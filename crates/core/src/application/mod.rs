// Application Layer - Registry, context routing, job execution and retrieval

pub mod context;
pub mod log_sink;
pub mod reaper;
pub mod registry;
pub mod retrieval;
pub mod routing_layer;
pub mod runner;

// Re-exports
pub use context::{current_job_id, run_with_context, run_with_context_sync, spawn_in_context};
pub use log_sink::{Delivery, LogSink};
pub use reaper::{JobReaper, ReaperConfig};
pub use registry::{JobRegistry, StatusCounts};
pub use retrieval::{ActiveJobs, LogPoll, LogRetrieval};
pub use routing_layer::JobRoutingLayer;
pub use runner::{CancelOutcome, JobRunner};
