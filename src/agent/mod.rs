//! Notification agent
//!
//! A long-lived local process that accepts notify requests over a Unix
//! domain socket, stashes the click action in a durable store and runs it
//! once when the user clicks the notification.

pub mod center;
pub mod client;
pub mod launch;
pub mod protocol;
pub mod runtime;
pub mod store;
pub mod transport;

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;

pub use client::{ensure_running, AgentClient, Bootstrap, ClientError};
pub use protocol::{AgentResponse, FailureCode, NotifyAction, NotifyRequest};
pub use runtime::{AgentRuntime, Dispatcher};
pub use store::{ActionStore, StoreError};

const APP_NAME: &str = "pane-notifier";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Per-user data directory
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

/// Default socket path for the agent
pub fn socket_path() -> PathBuf {
    project_dirs()
        .map(|d| d.runtime_dir().unwrap_or(d.data_dir()).to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
        .join("agent.sock")
}

/// Default location of the action store
pub fn actions_path() -> PathBuf {
    data_dir().join("actions.json")
}

/// Directory holding agent and CLI logs
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// ISO-8601 with millisecond precision, e.g. `2026-10-17T09:30:00.125Z`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
