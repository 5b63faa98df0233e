//! WalletLink Library
//!
//! Wallet session and transaction core for a DAO community client:
//! pairs with an external signer over a relay, keeps the session alive
//! across restarts, and builds and dispatches contract calls, including
//! multi-module DAO deployments.

pub mod cli;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod relay;
pub mod session;

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LogConfig;

pub use error::Error;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing: stderr plus a non-blocking file layer.
///
/// The returned guard must be held for the lifetime of the process so
/// buffered log lines are flushed on exit.
pub fn init_logging(level: &str, log: &LogConfig) -> Result<WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let path = Path::new(&log.file_path);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", log.file_path))?;

    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("walletlink={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
