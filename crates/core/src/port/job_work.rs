// Job Work Port
// Abstraction for the evaluation engine that produces log lines while it runs

use crate::port::cancel::CancelToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Maximum number of arguments accepted for one run
const MAX_ARGS: usize = 256;

/// Parameters of one evaluation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RunRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.command.trim().is_empty() {
            return Err(ExecutionError::InvalidRequest(
                "command cannot be empty".to_string(),
            ));
        }
        if self.args.len() > MAX_ARGS {
            return Err(ExecutionError::InvalidRequest(format!(
                "too many arguments (max {})",
                MAX_ARGS
            )));
        }
        let has_nul = std::iter::once(&self.command)
            .chain(self.args.iter())
            .any(|s| s.contains('\0'));
        if has_nul {
            return Err(ExecutionError::InvalidRequest(
                "command and arguments must not contain NUL bytes".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(ExecutionError::InvalidRequest(
                "timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// One-line description used in lifecycle log lines
    pub fn summary(&self) -> String {
        match &self.description {
            Some(desc) => desc.clone(),
            None if self.args.is_empty() => self.command.clone(),
            None => format!("{} {}", self.command, self.args.join(" ")),
        }
    }
}

/// What a successful run reports back to the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkOutcome {
    pub result: Option<serde_json::Value>,
    pub eval_id: Option<String>,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Exited with code {exit_code:?}: {message}")]
    Failed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Job Work trait
///
/// The runner calls `execute` inside the job's execution context, so every
/// line the implementation emits is routed to that job's log.
///
/// Implementations:
/// - CommandWork: runs an evaluation command as a subprocess
/// - mocks: scripted work for tests
#[async_trait]
pub trait JobWork: Send + Sync {
    /// Run the work for `job_id` until it finishes or `cancel` fires
    ///
    /// # Errors
    /// - ExecutionError::InvalidRequest if the request is malformed
    /// - ExecutionError::Cancelled if the cancel token fired first
    /// - ExecutionError::Timeout if `timeout_ms` elapsed
    async fn execute(
        &self,
        job_id: &str,
        request: &RunRequest,
        cancel: CancelToken,
    ) -> Result<WorkOutcome, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::application::log_sink::LogSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock work behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Emit the lines, then succeed with the given eval id
        Succeed { eval_id: Option<String> },
        /// Emit the lines, then fail with message
        Fail(String),
        /// Emit the lines, then panic (for panic isolation testing)
        Panic(String),
        /// Emit the lines, then keep emitting ticks until cancelled
        UntilCancelled,
        /// Tick until cancelled, then emit these lines (with the delay) while stopping
        WindDown(Vec<String>),
        /// Keep emitting ticks and never look at the cancel token
        IgnoreCancel,
    }

    /// Scripted work: emits lines through a LogSink with an optional delay
    pub struct ScriptedWork {
        sink: LogSink,
        lines: Vec<String>,
        delay: Duration,
        behavior: MockBehavior,
        call_count: AtomicUsize,
    }

    impl ScriptedWork {
        pub fn new(sink: LogSink, lines: Vec<String>, behavior: MockBehavior) -> Self {
            Self {
                sink,
                lines,
                delay: Duration::ZERO,
                behavior,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn succeeding(sink: LogSink, lines: &[&str]) -> Self {
            Self::new(
                sink,
                lines.iter().map(|s| s.to_string()).collect(),
                MockBehavior::Succeed { eval_id: None },
            )
        }

        /// Sleep between lines so concurrent jobs interleave
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        async fn tick_until(&self, cancel: &mut CancelToken) {
            let mut tick = 0u64;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        self.sink.emit(format!("tick {}", tick));
                        tick += 1;
                    }
                }
            }
        }
    }

    #[async_trait]
    impl JobWork for ScriptedWork {
        async fn execute(
            &self,
            _job_id: &str,
            _request: &RunRequest,
            mut cancel: CancelToken,
        ) -> Result<WorkOutcome, ExecutionError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            for line in &self.lines {
                if cancel.is_cancelled() {
                    return Err(ExecutionError::Cancelled);
                }
                self.sink.emit(line.clone());
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
            }

            match &self.behavior {
                MockBehavior::Succeed { eval_id } => Ok(WorkOutcome {
                    result: Some(serde_json::json!({ "lines": self.lines.len() })),
                    eval_id: eval_id.clone(),
                }),
                MockBehavior::Fail(msg) => Err(ExecutionError::Failed {
                    exit_code: Some(1),
                    message: msg.clone(),
                }),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::UntilCancelled => {
                    self.tick_until(&mut cancel).await;
                    Err(ExecutionError::Cancelled)
                }
                MockBehavior::WindDown(farewell) => {
                    self.tick_until(&mut cancel).await;
                    for line in farewell {
                        tokio::time::sleep(self.delay).await;
                        self.sink.emit(line.clone());
                    }
                    Err(ExecutionError::Cancelled)
                }
                MockBehavior::IgnoreCancel => {
                    self.tick_until(&mut CancelToken::never()).await;
                    Err(ExecutionError::Cancelled)
                }
            }
        }
    }
}
