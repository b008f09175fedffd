//! Daemon configuration, read from `JOBLANE_*` environment variables

use anyhow::{Context, Result};
use joblane_api_rpc::server::{RpcServerConfig, DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use joblane_core::application::runner::constants::{
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_POLL_PAGE_SIZE, DEFAULT_REAP_GRACE_PERIOD,
    DEFAULT_REAP_INTERVAL,
};
use joblane_core::application::ReaperConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected pretty or json)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
    /// Zero disables reaping
    pub reap_grace: Duration,
    pub reap_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub env_allowlist: Vec<String>,
    pub poll_page_size: usize,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parsed = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, raw))
                })
                .transpose()
        };

        let rpc_port = match lookup("JOBLANE_RPC_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("JOBLANE_RPC_PORT is not a valid port: '{}'", raw))?,
            None => DEFAULT_RPC_PORT,
        };

        let log_format = match lookup("JOBLANE_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            None => LogFormat::Pretty,
        };

        let env_allowlist = match lookup("JOBLANE_ENV_ALLOWLIST") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            rpc_host: lookup("JOBLANE_RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port,
            log_format,
            log_dir: lookup("JOBLANE_LOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            reap_grace: parsed("JOBLANE_REAP_GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REAP_GRACE_PERIOD),
            reap_interval: parsed("JOBLANE_REAP_INTERVAL_SECS")?
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(DEFAULT_REAP_INTERVAL),
            max_concurrent_jobs: parsed("JOBLANE_MAX_CONCURRENT_JOBS")?
                .map(|n| n.max(1) as usize)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS),
            env_allowlist,
            poll_page_size: parsed("JOBLANE_POLL_PAGE_SIZE")?
                .map(|n| n.max(1) as usize)
                .unwrap_or(DEFAULT_POLL_PAGE_SIZE),
        })
    }

    pub fn rpc_server(&self) -> RpcServerConfig {
        RpcServerConfig {
            host: self.rpc_host.clone(),
            port: self.rpc_port,
        }
    }

    /// None when reaping is disabled
    pub fn reaper(&self) -> Option<ReaperConfig> {
        (!self.reap_grace.is_zero()).then(|| ReaperConfig {
            grace_period: self.reap_grace,
            interval: self.reap_interval,
        })
    }
}
