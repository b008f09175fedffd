// tracing Layer that captures job-scoped events into job log buffers

use crate::application::context::current_job_id;
use crate::application::log_sink::JOB_LOG_TARGET;
use crate::application::registry::JobRegistry;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Routes every `tracing` event raised inside a job's execution context into
/// that job's buffer, so library code that only knows `tracing::info!` still
/// ends up in the right job log.
///
/// Events produced by `LogSink::emit` are skipped (they are already routed).
/// Routing failures are ignored here: logging from inside event dispatch would
/// recurse.
pub struct JobRoutingLayer {
    registry: Arc<JobRegistry>,
}

impl JobRoutingLayer {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }
}

impl<S: Subscriber> Layer<S> for JobRoutingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() == JOB_LOG_TARGET {
            return;
        }
        let Some(job_id) = current_job_id() else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!("{:>5} {}", metadata.level(), visitor.finish());
        let _ = self.registry.append(&job_id, line);
    }
}

/// Formats an event as `message key=value ...`
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}
