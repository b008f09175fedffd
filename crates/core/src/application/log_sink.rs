//! Context-aware log emission
//!
//! `LogSink::emit` is the single entry point producers use. Each line is
//! always written to the baseline `tracing` output, then routed to the buffer
//! of the job bound to the calling task (see [`crate::application::context`]).
//! Lines emitted outside any job context stay on the baseline output only.

use crate::application::context::current_job_id;
use crate::application::registry::JobRegistry;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// `tracing` target of baseline events produced by `emit`.
///
/// The job routing layer skips this target so emitted lines are not captured twice.
pub const JOB_LOG_TARGET: &str = "joblane::job";

/// Where an emitted line ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Appended to the bound job's buffer at this sequence number
    Routed { sequence_number: u64 },
    /// No job context bound; baseline output only
    Unbound,
    /// A job was bound but its entry is gone (removed mid-flight)
    Dropped,
}

/// Process-wide log sink routing lines by execution context
#[derive(Clone)]
pub struct LogSink {
    registry: Arc<JobRegistry>,
}

impl LogSink {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Emit one line. Never fails: routing misses are reported on the baseline output.
    pub fn emit(&self, text: impl Into<String>) -> Delivery {
        let text = text.into();
        let Some(job_id) = current_job_id() else {
            info!(target: JOB_LOG_TARGET, "{}", text);
            return Delivery::Unbound;
        };

        info!(target: JOB_LOG_TARGET, job_id = %job_id, "{}", text);
        match self.registry.append(&job_id, text) {
            Ok(sequence_number) => Delivery::Routed { sequence_number },
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Dropped job log line");
                Delivery::Dropped
            }
        }
    }
}

static GLOBAL_SINK: OnceLock<LogSink> = OnceLock::new();

/// Install the process-wide sink used by [`emit`]. Returns false if one was already installed.
pub fn install_global(sink: LogSink) -> bool {
    GLOBAL_SINK.set(sink).is_ok()
}

pub fn global() -> Option<&'static LogSink> {
    GLOBAL_SINK.get()
}

/// Emit through the process-wide sink.
///
/// Before a sink is installed there is nowhere to route to, so lines go to the
/// baseline output only.
pub fn emit(text: impl Into<String>) -> Delivery {
    match GLOBAL_SINK.get() {
        Some(sink) => sink.emit(text),
        None => {
            let text = text.into();
            match current_job_id() {
                Some(job_id) => {
                    info!(target: JOB_LOG_TARGET, job_id = %job_id, "{}", text);
                    warn!(job_id = %job_id, "No global log sink installed, line not routed");
                    Delivery::Dropped
                }
                None => {
                    info!(target: JOB_LOG_TARGET, "{}", text);
                    Delivery::Unbound
                }
            }
        }
    }
}
