//! Client half of the cursor protocol

use crate::client::JoblaneClient;
use crate::error::Result;
use crate::types::{LogLine, LogPoll};
use std::time::Duration;

/// Follows one job's log with a client-held cursor.
///
/// The daemon keeps no per-observer state, so any number of followers can
/// read the same job independently.
pub struct LogFollower<'a> {
    client: &'a JoblaneClient,
    job_id: String,
    cursor: u64,
}

impl<'a> LogFollower<'a> {
    pub fn new(client: &'a JoblaneClient, job_id: impl Into<String>) -> Self {
        Self {
            client,
            job_id: job_id.into(),
            cursor: 0,
        }
    }

    /// Resume from a previously stored cursor
    pub fn starting_at(mut self, cursor: u64) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Fetch the lines since the last poll and advance the cursor
    pub async fn poll_once(&mut self) -> Result<LogPoll> {
        let poll = self.client.poll_logs(&self.job_id, self.cursor).await?;
        self.cursor = poll.next_cursor;
        Ok(poll)
    }

    /// Poll every `interval` until the job is terminal, then drain.
    ///
    /// Returns the last (empty) poll, which carries the final status and
    /// outcome. An unknown job fails with an error whose `is_not_found()` is true.
    pub async fn follow<F>(&mut self, interval: Duration, mut on_line: F) -> Result<LogPoll>
    where
        F: FnMut(&LogLine),
    {
        loop {
            let poll = self.poll_once().await?;
            poll.lines.iter().for_each(&mut on_line);
            if poll.status.is_terminal() {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        // Lines can still arrive after the terminal status, and pages are bounded
        loop {
            let poll = self.poll_once().await?;
            if poll.lines.is_empty() {
                return Ok(poll);
            }
            poll.lines.iter().for_each(&mut on_line);
        }
    }
}
