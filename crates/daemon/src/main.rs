//! Joblane daemon - Main Entry Point
//! JSON-RPC server + job runner + reaper

mod config;
mod logging;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use config::DaemonConfig;
use joblane_api_rpc::{RpcHandler, RpcServer};
use joblane_core::application::log_sink::install_global;
use joblane_core::application::{JobReaper, JobRegistry, JobRunner, LogRetrieval};
use joblane_core::port::id_provider::UuidProvider;
use joblane_core::port::time_provider::SystemTimeProvider;
use joblane_core::port::{cancel_channel, JobWork, TimeProvider};
use joblane_infra_process::CommandWork;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long shutdown waits for cancelled jobs to record their final status
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::from_env()?;

    // 2. Registry first: the logging layer routes job-scoped events into it
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let registry = Arc::new(JobRegistry::new(Arc::clone(&time_provider)));

    // 3. Initialize logging
    let _log_guard = logging::init(
        config.log_format,
        config.log_dir.as_deref(),
        Arc::clone(&registry),
    )?;

    info!("Joblane daemon v{} starting...", VERSION);
    info!(config = ?config, "Configuration loaded");

    // 4. Setup dependencies (DI wiring)
    let runner = JobRunner::new(
        Arc::clone(&registry),
        Arc::new(UuidProvider),
        config.max_concurrent_jobs,
    );
    if !install_global(runner.sink().clone()) {
        warn!("Global log sink was already installed");
    }

    let work: Arc<dyn JobWork> = Arc::new(CommandWork::new(
        runner.sink().clone(),
        Arc::clone(&time_provider),
        config.env_allowlist.clone(),
    ));
    let retrieval = Arc::new(LogRetrieval::with_page_size(
        Arc::clone(&registry),
        config.poll_page_size,
    ));

    // 5. Start reaper
    let (reaper_stop, reaper_token) = cancel_channel();
    let reaper_handle = match config.reaper() {
        Some(reaper_config) => {
            let reaper = JobReaper::new(Arc::clone(&registry), time_provider, reaper_config);
            Some(tokio::spawn(reaper.run(reaper_token)))
        }
        None => {
            info!("Job reaping disabled (JOBLANE_REAP_GRACE_SECS=0)");
            None
        }
    };

    // 6. Start JSON-RPC server
    let handler = RpcHandler::new(runner.clone(), retrieval, work);
    let (addr, rpc_handle) = RpcServer::new(config.rpc_server(), handler)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;

    let cancelled = runner.shutdown();
    info!(cancelled = cancelled, "Cancelled in-flight jobs");

    let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
        while runner.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(remaining = runner.in_flight(), "Jobs still running at shutdown");
    }

    reaper_stop.cancel();
    if let Some(handle) = reaper_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete.");

    Ok(())
}
