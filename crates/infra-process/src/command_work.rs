// Command work implementation
// Runs an evaluation command and streams its output into the job's log
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use joblane_core::application::LogSink;
use joblane_core::port::{CancelToken, ExecutionError, JobWork, RunRequest, TimeProvider, WorkOutcome};

/// Output line that reports the evaluation id back to the runner
pub const EVAL_ID_MARKER: &str = "EVAL_ID=";

/// Prefix for lines read from the child's stderr
const STDERR_PREFIX: &str = "[stderr] ";

/// Default time between SIGTERM and SIGKILL (5 seconds)
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

enum Interrupt {
    Cancelled,
    TimedOut(u64),
}

/// Command work
///
/// Spawns the requested command with an allowlisted environment and emits
/// every stdout/stderr line through the LogSink. The runner calls `execute`
/// inside the job's execution context, so those lines land in that job's log.
pub struct CommandWork {
    sink: LogSink,
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Vec<String>,
    kill_grace: Duration,
}

impl CommandWork {
    /// Create a new command work adapter
    ///
    /// # Arguments
    /// * `sink` - Log sink lines are emitted through
    /// * `time_provider` - Time provider for duration tracking
    /// * `env_allowlist` - Environment variables the child may see
    ///
    /// # Example
    /// ```ignore
    /// let work = CommandWork::new(
    ///     sink,
    ///     Arc::new(SystemTimeProvider),
    ///     vec!["PATH".to_string(), "HOME".to_string()],
    /// );
    /// ```
    pub fn new(sink: LogSink, time_provider: Arc<dyn TimeProvider>, env_allowlist: Vec<String>) -> Self {
        Self {
            sink,
            time_provider,
            env_allowlist,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    /// Allowlisted daemon environment, overridden by allowlisted request entries
    fn build_env(&self, request_env: &HashMap<String, String>) -> HashMap<String, String> {
        let inherited = std::env::vars().filter(|(k, _)| self.env_allowlist.contains(k));
        let requested = request_env
            .iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()));
        inherited.chain(requested).collect()
    }

    fn spawn(&self, request: &RunRequest) -> Result<Child, ExecutionError> {
        let mut command = Command::new(&request.command);
        command
            .args(&request.args)
            .env_clear()
            .envs(self.build_env(&request.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }

        // Own process group so cancellation reaches grandchildren too
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", request.command, e)))
    }

    /// SIGTERM the process group, then SIGKILL after the grace period
    async fn terminate(&self, job_id: &str, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                let pgid = Pid::from_raw(pid as i32);
                info!(job_id = %job_id, pid = pid, "Sending SIGTERM to evaluation process group");
                if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                    debug!(job_id = %job_id, error = %e, "SIGTERM failed");
                }

                if timeout(self.kill_grace, child.wait()).await.is_ok() {
                    info!(job_id = %job_id, "Evaluation process exited after SIGTERM");
                    return;
                }

                warn!(job_id = %job_id, "Evaluation process ignored SIGTERM, sending SIGKILL");
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }

        if let Err(e) = child.kill().await {
            debug!(job_id = %job_id, error = %e, "Kill after termination failed");
        }
    }
}

/// Extract `<id>` from an `EVAL_ID=<id>` output line
pub fn parse_eval_id(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix(EVAL_ID_MARKER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl JobWork for CommandWork {
    async fn execute(
        &self,
        job_id: &str,
        request: &RunRequest,
        mut cancel: CancelToken,
    ) -> Result<WorkOutcome, ExecutionError> {
        request.validate()?;
        let start_time = self.time_provider.now_millis();

        info!(
            job_id = %job_id,
            command = %request.command,
            args = ?request.args,
            timeout_ms = ?request.timeout_ms,
            "Starting evaluation command"
        );

        let mut child = self.spawn(request)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::IoError("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::IoError("stderr was not captured".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let (mut out_open, mut err_open) = (true, true);
        let mut last_stdout: Option<String> = None;
        let mut line_count: u64 = 0;

        let deadline = request
            .timeout_ms
            .map(|ms| (ms, Instant::now() + Duration::from_millis(ms)));
        let expired = async move {
            match deadline {
                Some((ms, at)) => {
                    sleep_until(at).await;
                    ms
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        let interrupted = loop {
            if !out_open && !err_open {
                break None;
            }
            tokio::select! {
                line = out_lines.next_line(), if out_open => match line {
                    Ok(Some(line)) => {
                        self.sink.emit(line.clone());
                        last_stdout = Some(line);
                        line_count += 1;
                    }
                    Ok(None) => out_open = false,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed reading stdout");
                        out_open = false;
                    }
                },
                line = err_lines.next_line(), if err_open => match line {
                    Ok(Some(line)) => {
                        self.sink.emit(format!("{}{}", STDERR_PREFIX, line));
                        line_count += 1;
                    }
                    Ok(None) => err_open = false,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed reading stderr");
                        err_open = false;
                    }
                },
                _ = cancel.cancelled() => break Some(Interrupt::Cancelled),
                ms = &mut expired => break Some(Interrupt::TimedOut(ms)),
            }
        };

        let status = match interrupted {
            Some(interrupt) => Err(interrupt),
            None => tokio::select! {
                status = child.wait() => Ok(status),
                _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                ms = &mut expired => Err(Interrupt::TimedOut(ms)),
            },
        };

        let status = match status {
            Ok(status) => status.map_err(|e| ExecutionError::IoError(e.to_string()))?,
            Err(interrupt) => {
                self.terminate(job_id, &mut child).await;
                return Err(match interrupt {
                    Interrupt::Cancelled => ExecutionError::Cancelled,
                    Interrupt::TimedOut(ms) => ExecutionError::Timeout(ms),
                });
            }
        };

        let duration_ms = self.time_provider.now_millis() - start_time;
        info!(
            job_id = %job_id,
            duration_ms = duration_ms,
            exit_code = ?status.code(),
            lines = line_count,
            "Evaluation command finished"
        );

        if !status.success() {
            return Err(ExecutionError::Failed {
                exit_code: status.code(),
                message: format!("{} exited unsuccessfully", request.command),
            });
        }

        Ok(WorkOutcome {
            result: Some(serde_json::json!({
                "exit_code": status.code(),
                "duration_ms": duration_ms,
                "line_count": line_count,
            })),
            // Only the final stdout line reports the evaluation id
            eval_id: last_stdout.as_deref().and_then(parse_eval_id),
        })
    }
}
