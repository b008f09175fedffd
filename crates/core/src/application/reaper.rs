// Job Reaper
// Reclaims finished jobs once observers have had time for their final read

use crate::application::registry::JobRegistry;
use crate::application::runner::constants::{DEFAULT_REAP_GRACE_PERIOD, DEFAULT_REAP_INTERVAL};
use crate::port::{CancelToken, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Reaper configuration
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How long a terminal job stays readable after `completed_at`
    pub grace_period: Duration,
    /// How often to sweep
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_REAP_GRACE_PERIOD,
            interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

/// Job reaper
///
/// Only terminal jobs are ever removed, and only after the grace period, so
/// releasing a job's execution context and dropping its buffer stay independent.
pub struct JobReaper {
    registry: Arc<JobRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    config: ReaperConfig,
}

impl JobReaper {
    pub fn new(
        registry: Arc<JobRegistry>,
        time_provider: Arc<dyn TimeProvider>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            registry,
            time_provider,
            config,
        }
    }

    /// Run the sweep loop until `stop` fires. Should be spawned in tokio::spawn.
    pub async fn run(self, mut stop: CancelToken) {
        info!(
            grace_secs = self.config.grace_period.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "Job reaper started"
        );

        let mut tick = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let reaped = self.reap_now();
                    if reaped > 0 {
                        info!(reaped = reaped, remaining = self.registry.len(), "Reaped finished jobs");
                    }
                }
                _ = stop.cancelled() => {
                    info!("Job reaper stopped");
                    break;
                }
            }
        }
    }

    /// Remove terminal jobs whose grace period has elapsed; returns how many
    pub fn reap_now(&self) -> usize {
        let grace_ms = i64::try_from(self.config.grace_period.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.time_provider.now_millis().saturating_sub(grace_ms);

        let expired: Vec<String> = self
            .registry
            .list_all()
            .into_iter()
            .filter(|job| job.is_terminal())
            .filter(|job| job.completed_at.is_some_and(|done| done <= cutoff))
            .map(|job| job.id)
            .collect();

        expired
            .iter()
            .filter(|id| {
                debug!(job_id = %id, "Reaping finished job");
                self.registry.remove(id)
            })
            .count()
    }
}
