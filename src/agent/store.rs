//! Durable click-action store
//!
//! Maps request ids to the action to run when that notification is clicked.
//! Every operation loads the whole table, prunes expired entries, mutates and
//! writes the table back with write-then-rename, all under one mutex.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use super::protocol::NotifyAction;
use super::{format_timestamp, parse_timestamp};

/// Default retention window for unclicked actions
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("action store {op} failed for {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("action store at {} is corrupt: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize action store: {0}")]
    Encode(#[source] serde_json::Error),
}

/// On-disk form of an action
///
/// Fields are declared in key order so the pretty-printed file has sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredAction {
    arguments: Vec<String>,
    #[serde(rename = "createdAt")]
    created_at: String,
    executable: String,
}

type ActionTable = BTreeMap<String, StoredAction>;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct ActionStore {
    path: PathBuf,
    retention: Duration,
    clock: Clock,
    lock: Mutex<()>,
}

impl ActionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            clock: Box::new(Utc::now),
            lock: Mutex::new(()),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the time source (tests)
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `action` for `request_id`, overwriting any previous entry
    pub fn save(&self, request_id: &str, action: &NotifyAction) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut table = self.load_table()?;
        let now = (self.clock)();
        self.prune_expired(&mut table, now);

        table.insert(
            request_id.to_string(),
            StoredAction {
                arguments: action.arguments.clone(),
                created_at: format_timestamp(now),
                executable: action.executable.clone(),
            },
        );
        self.persist(&table)?;
        debug!(request_id, entries = table.len(), "Saved click action");
        Ok(())
    }

    /// Remove and return the action for `request_id`
    ///
    /// A given action is returned at most once.
    pub fn take(&self, request_id: &str) -> Result<Option<NotifyAction>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut table = self.load_table()?;
        let pruned = self.prune_expired(&mut table, (self.clock)());

        match table.remove(request_id) {
            Some(stored) => {
                self.persist(&table)?;
                Ok(Some(NotifyAction {
                    executable: stored.executable,
                    arguments: stored.arguments,
                }))
            }
            None => {
                if pruned {
                    self.persist(&table)?;
                }
                Ok(None)
            }
        }
    }

    /// Delete the action for `request_id`; absent ids are not an error
    pub fn remove(&self, request_id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut table = self.load_table()?;
        let pruned = self.prune_expired(&mut table, (self.clock)());
        let removed = table.remove(request_id).is_some();

        if pruned || removed {
            self.persist(&table)?;
        }
        Ok(())
    }

    /// Missing or empty file is an empty table; anything unparsable is an error
    fn load_table(&self) -> Result<ActionTable, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ActionTable::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    op: "read",
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if data.is_empty() {
            return Ok(ActionTable::new());
        }

        serde_json::from_slice(&data).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Entries survive only while `now - created_at < retention`
    fn prune_expired(&self, table: &mut ActionTable, now: DateTime<Utc>) -> bool {
        let before = table.len();
        table.retain(|request_id, stored| match parse_timestamp(&stored.created_at) {
            Some(created_at) => now - created_at < self.retention,
            None => {
                debug!(request_id = %request_id, "Dropping action with unreadable timestamp");
                false
            }
        });

        let pruned = before - table.len();
        if pruned > 0 {
            debug!(pruned, "Pruned expired click actions");
        }
        pruned > 0
    }

    fn persist(&self, table: &ActionTable) -> Result<(), StoreError> {
        let io_err = |op: &'static str| {
            let path = self.path.clone();
            move |source: io::Error| StoreError::Io { op, path, source }
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err("create directory"))?;
        }

        let mut json = serde_json::to_vec_pretty(table).map_err(StoreError::Encode)?;
        json.push(b'\n');

        // Atomic write: temp file in the same directory, then rename.
        let tmp_path = self.path.with_extension("json.tmp");
        let result = (|| -> Result<(), StoreError> {
            let mut file = std::fs::File::create(&tmp_path).map_err(io_err("write"))?;
            file.write_all(&json).map_err(io_err("write"))?;
            file.sync_all().map_err(io_err("sync"))?;
            std::fs::rename(&tmp_path, &self.path).map_err(io_err("rename"))
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }
}
