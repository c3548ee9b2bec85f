//! Notification context from coding agent hooks
//!
//! Codex passes its notify payload as an argument (or env var / stdin) and
//! Claude Code pipes a hook record on stdin. Both are loose JSON; we only pull
//! out a title, a message and a sound.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::multiplexer::TmuxContext;

/// Upper bound when reading the session header of a Codex rollout file
const MAX_SESSION_META_BYTES: u64 = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agent {
    Codex,
    Claude,
}

impl Agent {
    pub fn default_title(&self, repository: &str) -> String {
        match self {
            Agent::Codex => format!("Codex: {}", repository),
            Agent::Claude => format!("Claude: {}", repository),
        }
    }
}

/// What a hook payload contributed to the notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_subagent: Option<bool>,
}

/// Process environment the loaders depend on
#[derive(Debug, Clone)]
pub struct HookEnv {
    pub home: Option<PathBuf>,
    /// `CODEX_NOTIFICATION_SOUND`
    pub env_sound: Option<String>,
    /// Sound used when a payload just asks for "the default"
    pub default_sound: String,
    /// Shown in the default `Codex: <repo>` title
    pub repository: String,
}

impl HookEnv {
    pub fn from_process(default_sound: impl Into<String>) -> Self {
        let home = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf());
        let env_sound = std::env::var("CODEX_NOTIFICATION_SOUND")
            .ok()
            .and_then(|s| non_empty(&s));
        let cwd = std::env::current_dir().ok();
        Self {
            home,
            env_sound,
            default_sound: default_sound.into(),
            repository: repository_display_name(cwd.as_deref()),
        }
    }

    fn codex_sessions_root(&self) -> Option<PathBuf> {
        self.home.as_ref().map(|h| h.join(".codex").join("sessions"))
    }
}

/// Last path component of the working directory, or `Repository`
pub fn repository_display_name(cwd: Option<&Path>) -> String {
    cwd.and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
        .unwrap_or_else(|| "Repository".to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).and_then(non_empty)
}

fn parse_object(payload: &str, agent: &str) -> Result<Option<Map<String, Value>>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(payload)
        .with_context(|| format!("Failed to parse {} payload JSON", agent))?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

/// Codex notify payload to context; `None` when there is nothing to parse
pub fn load_codex(payload: &str, env: &HookEnv) -> Result<Option<HookContext>> {
    let Some(record) = parse_object(payload, "Codex")? else {
        return Ok(None);
    };

    let thread_id = codex_thread_id(&record);
    let is_subagent = match (&thread_id, env.codex_sessions_root()) {
        (Some(id), Some(root)) => codex_subagent_state(&root, id),
        _ => None,
    };

    Ok(Some(HookContext {
        title: Some(Agent::Codex.default_title(&env.repository)),
        message: extract_message(&record),
        sound: resolve_hook_sound(&record, env),
        thread_id,
        is_subagent,
    }))
}

/// Claude Code hook record to context
pub fn load_claude(payload: &str, env: &HookEnv) -> Result<Option<HookContext>> {
    let Some(record) = parse_object(payload, "Claude")? else {
        return Ok(None);
    };

    let title = str_field(&record, "notification_title")
        .or_else(|| str_field(&record, "notification-title"))
        .or_else(|| str_field(&record, "title"))
        .unwrap_or_else(|| Agent::Claude.default_title(&env.repository));

    let message = str_field(&record, "notification_message")
        .or_else(|| str_field(&record, "notification-message"))
        .or_else(|| extract_message(&record))
        .or_else(|| {
            let raw = record
                .get("transcript_path")
                .or_else(|| record.get("transcriptPath"))?;
            let path = resolve_transcript_path(raw.as_str()?, env.home.as_deref())?;
            read_transcript(&path)
        });

    Ok(Some(HookContext {
        title: Some(title),
        message,
        sound: resolve_hook_sound(&record, env),
        thread_id: None,
        is_subagent: None,
    }))
}

/// Best assistant text in a hook record
pub fn extract_message(record: &Map<String, Value>) -> Option<String> {
    if let Some(text) = str_field(record, "last-assistant-message") {
        return Some(text);
    }
    if let Some(text) = str_field(record, "message") {
        return Some(text);
    }

    if let Some(messages) = record.get("messages").and_then(Value::as_array) {
        for entry in messages.iter().rev() {
            let Some(entry) = entry.as_object() else {
                continue;
            };
            if entry.get("role").and_then(Value::as_str).map(str::trim) != Some("assistant") {
                continue;
            }
            match entry.get("content") {
                Some(Value::String(s)) => {
                    if let Some(text) = non_empty(s) {
                        return Some(text);
                    }
                }
                Some(Value::Array(parts)) => {
                    let text = parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .find_map(non_empty);
                    if text.is_some() {
                        return text;
                    }
                }
                _ => {}
            }
        }
    }

    record
        .get("transcript")
        .and_then(|t| t.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.last())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .and_then(non_empty)
}

/// Interpret the payload's `sound` field, falling back to `CODEX_NOTIFICATION_SOUND`
///
/// Booleans and `default` pick the configured default, `false`/`0`/`none`
/// silence it, and paths are reduced to their file stem.
pub fn resolve_hook_sound(record: &Map<String, Value>, env: &HookEnv) -> Option<String> {
    let silent = || Some("None".to_string());
    let default = || Some(env.default_sound.clone());

    let raw = match record.get("sound") {
        Some(value) => value.clone(),
        None => Value::String(env.env_sound.clone()?),
    };

    match raw {
        Value::Null => None,
        Value::Bool(true) => default(),
        Value::Bool(false) => silent(),
        Value::Number(n) => {
            if n.as_f64() == Some(0.0) {
                silent()
            } else {
                None
            }
        }
        Value::String(s) => {
            let value = non_empty(&s)?;
            match value.to_ascii_lowercase().as_str() {
                "none" | "false" => silent(),
                "true" | "default" | "glass" => default(),
                _ if value.contains('/') => {
                    sound_name_from_path(&value).or_else(default)
                }
                _ => Some(value),
            }
        }
        _ => None,
    }
}

fn sound_name_from_path(path: &str) -> Option<String> {
    let last = path.rsplit('/').next()?;
    let stem = match last.rfind('.') {
        Some(idx) if idx > 0 => &last[..idx],
        _ => last,
    };
    non_empty(stem)
}

fn is_thread_id(value: &str) -> bool {
    (16..=128).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn codex_thread_id(record: &Map<String, Value>) -> Option<String> {
    ["thread-id", "thread_id", "threadId"]
        .iter()
        .filter_map(|key| str_field(record, key))
        .find(|id| is_thread_id(id))
}

/// Locate `<root>/<year>/<month>/<day>/rollout-*<thread_id>.jsonl`
pub fn find_rollout(sessions_root: &Path, thread_id: &str) -> Option<PathBuf> {
    let suffix = format!("{}.jsonl", thread_id);
    WalkDir::new(sessions_root)
        .min_depth(4)
        .max_depth(4)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with("rollout-") && name.ends_with(&suffix)
        })
        .map(|e| e.into_path())
}

fn read_first_line(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut buf = Vec::new();
    file.take(MAX_SESSION_META_BYTES).read_to_end(&mut buf).ok()?;
    let text = String::from_utf8_lossy(&buf);
    non_empty(text.split('\n').next()?)
}

/// Whether the Codex session behind `thread_id` was spawned as a subagent
///
/// `None` when the rollout cannot be found or read.
pub fn codex_subagent_state(sessions_root: &Path, thread_id: &str) -> Option<bool> {
    let rollout = find_rollout(sessions_root, thread_id)?;
    let line = read_first_line(&rollout)?;
    let header: Value = serde_json::from_str(&line).ok()?;
    let payload = header.get("payload")?.as_object()?;

    Some(match payload.get("source") {
        Some(Value::String(s)) => s.to_ascii_lowercase().starts_with("subagent"),
        Some(Value::Object(o)) => o.contains_key("subagent") || o.contains_key("subAgent"),
        _ => false,
    })
}

/// Lexical normalisation: resolves `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Accept a transcript path only inside the Claude projects directories
pub fn resolve_transcript_path(raw: &str, home: Option<&Path>) -> Option<PathBuf> {
    let raw = non_empty(raw)?;
    let expanded = match (raw.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(&raw),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir().ok()?.join(expanded)
    };
    let absolute = normalize(&absolute);

    if let Some(home) = home {
        let allowed = [
            home.join(".claude").join("projects"),
            home.join(".config").join("claude").join("projects"),
        ];
        if !allowed.iter().any(|base| absolute.starts_with(base)) {
            return None;
        }
    }

    absolute.exists().then_some(absolute)
}

fn transcript_text(message: &Map<String, Value>) -> Option<String> {
    if let Some(text) = str_field(message, "text") {
        return Some(text);
    }
    match message.get("content")? {
        Value::String(s) => non_empty(s),
        Value::Array(parts) => parts.iter().find_map(|part| match part {
            Value::String(s) => non_empty(s),
            Value::Object(o) => str_field(o, "text"),
            _ => None,
        }),
        _ => None,
    }
}

/// Last assistant text in a Claude JSONL transcript
pub fn read_transcript(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().rev().find_map(|line| {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let entry: Value = serde_json::from_str(line).ok()?;
        let message = entry.get("message")?.as_object()?;
        if let Some(role) = str_field(message, "role") {
            if role != "assistant" {
                return None;
            }
        }
        transcript_text(message)
    })
}

/// Title, message and sound of the notification about to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationDetails {
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct DetailOverrides {
    pub title: Option<String>,
    pub message: Option<String>,
    pub sound: Option<String>,
}

/// Merge flags, hook context and pane coordinates into notification text
///
/// Flags win over hook context, which wins over the agent default title and
/// finally the pane-derived defaults.
pub fn resolve_details(
    tmux: &TmuxContext,
    overrides: &DetailOverrides,
    context: Option<&HookContext>,
    agent_title: Option<String>,
) -> NotificationDetails {
    let pane_title = format!(
        "[{}] {}.{} ({})",
        tmux.session_name, tmux.window_index, tmux.pane_index, tmux.pane_id
    );
    let pane_message = format!(
        "cmd: {} | tty: {}",
        tmux.pane_current_command, tmux.client_tty
    );

    let title = overrides
        .title
        .clone()
        .or_else(|| context.and_then(|c| c.title.clone()))
        .or(agent_title)
        .filter(|t| !t.is_empty())
        .unwrap_or(pane_title);

    let message = overrides
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .or_else(|| context.and_then(|c| c.message.clone()).filter(|m| !m.is_empty()))
        .unwrap_or(pane_message);

    let sound = overrides
        .sound
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| context.and_then(|c| c.sound.clone()));

    NotificationDetails {
        title,
        message,
        sound,
    }
}
