//! Subscriber setup: console output, optional rolling file, and job log routing

use crate::config::LogFormat;
use anyhow::Result;
use joblane_core::application::{JobRegistry, JobRoutingLayer};
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "joblane=info";
const LOG_FILE_PREFIX: &str = "joblaned.log";

fn env_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?)
}

/// Install the global subscriber.
///
/// `RUST_LOG` only narrows the console and file output. Job routing sees every
/// INFO-or-above event so library output raised inside a job still reaches
/// that job's log. Keep the returned guard alive to flush the file writer.
pub fn init(
    format: LogFormat,
    log_dir: Option<&Path>,
    registry: Arc<JobRegistry>,
) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let routing = JobRoutingLayer::new(registry).with_filter(LevelFilter::INFO);
    let subscriber = tracing_subscriber::registry().with(routing).with(file_layer);

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_filter(env_filter()?))
            .try_init()?,
        LogFormat::Pretty => subscriber
            .with(fmt::layer().pretty().with_filter(env_filter()?))
            .try_init()?,
    }

    Ok(guard)
}
