// Runner constants (no magic values)
use std::time::Duration;

/// Default number of jobs executing at the same time
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;

/// How long cancelled work may take to wind down before its task is aborted (5 seconds)
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Maximum lines returned by one poll
pub const DEFAULT_POLL_PAGE_SIZE: usize = 1000;

/// Time a finished job stays readable before the reaper reclaims it (15 minutes)
pub const DEFAULT_REAP_GRACE_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Interval between reaper sweeps (1 minute)
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);
