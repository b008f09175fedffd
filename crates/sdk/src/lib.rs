//! Joblane SDK - Rust Client Library
//!
//! Client for the Joblane daemon: start evaluation jobs and follow their logs.
//!
//! # Example
//!
//! ```no_run
//! use joblane_sdk::{JoblaneClient, RunJobRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = JoblaneClient::connect("http://127.0.0.1:9630").await?;
//!     let started = client.run(RunJobRequest::new("./run-eval.sh")).await?;
//!
//!     let last = client
//!         .follow(&started.job_id)
//!         .follow(Duration::from_millis(500), |line| println!("{}", line.text))
//!         .await?;
//!     println!("finished: {}", last.status);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod follower;
mod types;

pub use client::JoblaneClient;
pub use error::{Result, SdkError, NOT_FOUND_CODE};
pub use follower::LogFollower;
pub use types::{
    ActiveJobs, CancelJobResponse, JobStatus, JobSummary, LogLine, LogPoll, RemoveJobResponse,
    RunJobRequest, RunJobResponse, StatsResponse,
};
