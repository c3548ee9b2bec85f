//! File logging via tracing-subscriber
//!
//! Both the agent and the short-lived CLI log to files under the data
//! directory; stdout/stderr stay free for command output.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file used by `agent run`
pub const AGENT_LOG: &str = "agent.log";
/// Log file shared by every other command
pub const CLI_LOG: &str = "cli.log";

/// `RUST_LOG` wins over `level`; an unparsable level falls back to `info`
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber, appending to `<log_dir>/<file_name>`
pub fn init_logging(log_dir: &Path, file_name: &str, level: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let log_path = log_dir.join(file_name);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(log_path)
}
