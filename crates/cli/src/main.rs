//! Joblane CLI - start evaluation jobs and follow their logs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use joblane_sdk::{JobStatus, JobSummary, JoblaneClient, LogLine, LogPoll, RunJobRequest, SdkError};
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9630";
const DEFAULT_INTERVAL_MS: &str = "500";

#[derive(Parser)]
#[command(name = "joblane")]
#[command(about = "Joblane CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "JOBLANE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an evaluation command as a job
    Run {
        /// Program to run
        command: String,

        /// Arguments passed to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Kill the job after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Human-readable description shown in the job log
        #[arg(short, long)]
        description: Option<String>,

        /// Environment variable for the job (KEY=VALUE, repeatable)
        #[arg(short, long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Stream the job log until it finishes
        #[arg(short, long)]
        follow: bool,

        /// Poll interval while following
        #[arg(long, default_value = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,
    },

    /// Print a job's log
    Logs {
        /// Job ID
        job_id: String,

        /// Start from this cursor instead of the beginning
        #[arg(short, long, default_value = "0")]
        cursor: u64,

        /// Keep polling until the job finishes
        #[arg(short, long)]
        follow: bool,

        /// Poll interval while following
        #[arg(long, default_value = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,
    },

    /// Show daemon status and active jobs
    Status,

    /// Show one job
    Show {
        /// Job ID
        job_id: String,
    },

    /// Cancel a job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Remove a job and its log
    Remove {
        /// Job ID
        job_id: String,
    },

    /// List jobs
    List {
        /// Only jobs with this status
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Running,
    Complete,
    Error,
    Cancelled,
}

impl From<StatusArg> for JobStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => JobStatus::Pending,
            StatusArg::Running => JobStatus::Running,
            StatusArg::Complete => JobStatus::Complete,
            StatusArg::Error => JobStatus::Error,
            StatusArg::Cancelled => JobStatus::Cancelled,
        }
    }
}

#[derive(Tabled)]
struct JobRow {
    job_id: String,
    status: String,
    eval_id: String,
    lines: u64,
    created: String,
}

impl From<JobSummary> for JobRow {
    fn from(job: JobSummary) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status.to_string(),
            eval_id: job.eval_id.unwrap_or_else(|| "-".to_string()),
            lines: job.log_count,
            created: format_millis(job.created_at),
        }
    }
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn colored_status(status: JobStatus) -> colored::ColoredString {
    match status {
        JobStatus::Pending => status.as_str().yellow(),
        JobStatus::Running => status.as_str().cyan(),
        JobStatus::Complete => status.as_str().green(),
        JobStatus::Error => status.as_str().red(),
        JobStatus::Cancelled => status.as_str().magenta(),
    }
}

fn print_line(line: &LogLine) {
    println!("{}", line.text);
}

/// Unknown ids get an explanation instead of a bare RPC error
fn explain(err: SdkError, job_id: &str) -> anyhow::Error {
    if err.is_not_found() {
        anyhow::anyhow!(
            "Job {} not found (the daemon may have restarted or already reaped it)",
            job_id
        )
    } else {
        anyhow::Error::new(err).context("Request to daemon failed")
    }
}

fn print_outcome(poll: &LogPoll) {
    println!();
    println!("{} {}", "Status:".bold(), colored_status(poll.status));
    if let Some(eval_id) = &poll.eval_id {
        println!("{} {}", "Eval ID:".bold(), eval_id);
    }
    if let Some(error) = &poll.error {
        println!("{} {}", "Error:".bold(), error.red());
    }
}

async fn follow_job(
    client: &JoblaneClient,
    job_id: &str,
    cursor: u64,
    interval: Duration,
) -> Result<()> {
    let mut follower = client.follow(job_id).starting_at(cursor);
    let last = follower
        .follow(interval, print_line)
        .await
        .map_err(|e| explain(e, job_id))?;
    print_outcome(&last);
    if last.status != JobStatus::Complete {
        anyhow::bail!("Job {} finished with status {}", job_id, last.status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = JoblaneClient::connect(&cli.rpc_url)
        .await
        .context("Failed to create RPC client")?;

    match cli.command {
        Commands::Run {
            command,
            args,
            timeout_ms,
            description,
            env,
            follow,
            interval_ms,
        } => {
            let mut request = RunJobRequest::new(command).args(args);
            request.timeout_ms = timeout_ms;
            request.description = description;
            request.env = env.into_iter().collect();

            let started = client
                .run(request)
                .await
                .context("Failed to start job")?;

            println!("{} {}", "✓ Job started:".green().bold(), started.job_id);

            if follow {
                println!();
                follow_job(
                    &client,
                    &started.job_id,
                    0,
                    Duration::from_millis(interval_ms),
                )
                .await?;
            }
        }

        Commands::Logs {
            job_id,
            cursor,
            follow,
            interval_ms,
        } => {
            if follow {
                follow_job(&client, &job_id, cursor, Duration::from_millis(interval_ms)).await?;
            } else {
                let poll = client
                    .poll_logs(&job_id, cursor)
                    .await
                    .map_err(|e| explain(e, &job_id))?;
                poll.lines.iter().for_each(print_line);
                eprintln!(
                    "{}",
                    format!("-- {} · next cursor {}", poll.status, poll.next_cursor).dimmed()
                );
            }
        }

        Commands::Status => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match client.stats().await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Total Jobs:".bold(), stats.total_jobs);
                    println!("  {} {}", "Pending:".bold(), stats.pending_jobs);
                    println!("  {} {}", "Running:".bold(), stats.running_jobs);
                    println!("  {} {}", "Complete:".bold(), stats.complete_jobs);
                    println!("  {} {}", "Error:".bold(), stats.error_jobs);
                    println!("  {} {}", "Cancelled:".bold(), stats.cancelled_jobs);
                    println!();
                    println!("  {} {} seconds", "Uptime:".bold(), stats.uptime_seconds);

                    let active = client.active_jobs().await?;
                    if !active.job_ids.is_empty() {
                        println!();
                        println!("  {}", "Active jobs:".bold());
                        for job_id in active.job_ids {
                            println!("    • {}", job_id);
                        }
                    }
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "OFFLINE".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Show { job_id } => {
            let job = client
                .get(&job_id)
                .await
                .map_err(|e| explain(e, &job_id))?;

            println!("{} {}", "Job:".bold(), job.job_id);
            println!("{} {}", "Status:".bold(), colored_status(job.status));
            println!("{} {}", "Created:".bold(), format_millis(job.created_at));
            if let Some(started) = job.started_at {
                println!("{} {}", "Started:".bold(), format_millis(started));
            }
            if let Some(completed) = job.completed_at {
                println!("{} {}", "Completed:".bold(), format_millis(completed));
            }
            println!("{} {}", "Log lines:".bold(), job.log_count);
            if let Some(eval_id) = &job.eval_id {
                println!("{} {}", "Eval ID:".bold(), eval_id);
            }
            if let Some(result) = &job.result {
                println!("{} {}", "Result:".bold(), result);
            }
            if let Some(error) = &job.error {
                println!("{} {}", "Error:".bold(), error.red());
            }
        }

        Commands::Cancel { job_id } => {
            let response = client
                .cancel(&job_id)
                .await
                .map_err(|e| explain(e, &job_id))?;

            if response.cancelled && response.status.is_terminal() {
                println!("{}", format!("✓ Job {} cancelled", job_id).green().bold());
            } else if response.cancelled {
                println!(
                    "{}",
                    format!("✓ Cancellation of job {} requested ({})", job_id, response.status)
                        .green()
                        .bold()
                );
            } else {
                println!(
                    "{}",
                    format!("Job {} already finished ({})", job_id, response.status).yellow()
                );
            }
        }

        Commands::Remove { job_id } => {
            let response = client.remove(&job_id).await?;
            if response.removed {
                println!("{}", format!("✓ Job {} removed", job_id).green().bold());
            } else {
                println!("{}", format!("Job {} was not present", job_id).yellow());
            }
        }

        Commands::List { status } => {
            let jobs = client.list(status.map(JobStatus::from)).await?;
            if jobs.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                let rows: Vec<JobRow> = jobs.into_iter().map(JobRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
