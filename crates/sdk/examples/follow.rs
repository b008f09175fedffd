//! Follow Example
//!
//! Starts a small shell job and streams its log until it finishes.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package joblane-daemon
//!    ```
//!
//! 2. Run this example:
//!    ```bash
//!    cargo run --example follow
//!    ```

use joblane_sdk::{JoblaneClient, RunJobRequest};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = JoblaneClient::connect("http://127.0.0.1:9630").await?;

    let started = client
        .run(
            RunJobRequest::new("/bin/sh")
                .args(["-c", "for i in 1 2 3; do echo probe $i; sleep 1; done; echo EVAL_ID=demo-1"])
                .description("demo evaluation"),
        )
        .await?;
    println!("Started job {} ({})", started.job_id, started.status);

    let mut follower = client.follow(&started.job_id);
    let last = follower
        .follow(Duration::from_millis(250), |line| {
            println!("[{:>4}] {}", line.sequence_number, line.text)
        })
        .await?;

    println!(
        "Job finished: status={} eval_id={:?} cursor={}",
        last.status,
        last.eval_id,
        follower.cursor()
    );

    Ok(())
}
