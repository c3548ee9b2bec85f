use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{Multiplexer, TmuxContext};

/// Format fields requested from `display-message`, one per line
const FORMAT_SEQUENCE: [&str; 8] = [
    "#{socket_path}",
    "#{client_tty}",
    "#{session_name}",
    "#{window_id}",
    "#{window_index}",
    "#{pane_id}",
    "#{pane_index}",
    "#{pane_current_command}",
];

/// tmux wrapper (Multiplexer trait 実装)
pub struct TmuxMultiplexer {
    tmux_bin: PathBuf,
}

impl TmuxMultiplexer {
    pub fn new(tmux_bin: impl Into<PathBuf>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
        }
    }

    pub fn tmux_bin(&self) -> &Path {
        &self.tmux_bin
    }

    /// Arguments for the metadata query
    fn query_args(target_pane: Option<&str>) -> Vec<String> {
        let mut args = vec!["display-message".to_string(), "-p".to_string()];
        if let Some(target) = target_pane.map(str::trim).filter(|t| !t.is_empty()) {
            args.push("-t".to_string());
            args.push(target.to_string());
        }
        args.push(FORMAT_SEQUENCE.join("\n"));
        args
    }
}

/// Parse the 8-line `display-message` response
pub fn parse_context(tmux_bin: &str, stdout: &str) -> Result<TmuxContext> {
    let normalized = stdout.replace("\r\n", "\n");
    let mut lines: Vec<&str> = normalized.split('\n').collect();
    while lines.len() > FORMAT_SEQUENCE.len() && lines.last() == Some(&"") {
        lines.pop();
    }
    if lines.len() != FORMAT_SEQUENCE.len() {
        anyhow::bail!("Unexpected tmux response while collecting pane metadata");
    }

    Ok(TmuxContext {
        tmux_bin: tmux_bin.to_string(),
        socket_path: lines[0].to_string(),
        client_tty: lines[1].to_string(),
        session_name: lines[2].to_string(),
        window_id: lines[3].to_string(),
        window_index: parse_number(lines[4], "window index")?,
        pane_id: lines[5].to_string(),
        pane_index: parse_number(lines[6], "pane index")?,
        pane_current_command: lines[7].to_string(),
    })
}

fn parse_number(value: &str, label: &str) -> Result<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        anyhow::bail!("Failed to parse {} as number: {}", label, value);
    }
    trimmed
        .parse()
        .with_context(|| format!("Failed to parse {} as number: {}", label, value))
}

/// Ordered tmux invocations that bring `context` back to the front
pub fn focus_commands(context: &TmuxContext) -> Vec<Vec<String>> {
    let base = ["-S".to_string(), context.socket_path.clone()];

    let mut switch_client = base.to_vec();
    switch_client.push("switch-client".to_string());
    if !context.client_tty.is_empty() {
        switch_client.push("-c".to_string());
        switch_client.push(context.client_tty.clone());
    }
    switch_client.push("-t".to_string());
    switch_client.push(context.session_name.clone());

    let mut select_window = base.to_vec();
    select_window.extend(["select-window".to_string(), "-t".to_string(), context.window_id.clone()]);

    let mut select_pane = base.to_vec();
    select_pane.extend(["select-pane".to_string(), "-t".to_string(), context.pane_id.clone()]);

    vec![switch_client, select_window, select_pane]
}

impl Multiplexer for TmuxMultiplexer {
    fn query_context(&self, target_pane: Option<&str>) -> Result<TmuxContext> {
        let output = Command::new(&self.tmux_bin)
            .args(Self::query_args(target_pane))
            .output()
            .context("Failed to execute tmux display-message")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux display-message failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_context(&self.tmux_bin.to_string_lossy(), &stdout)
    }

    fn focus(&self, context: &TmuxContext) -> Result<()> {
        for args in focus_commands(context) {
            let output = Command::new(&self.tmux_bin)
                .args(&args)
                .output()
                .with_context(|| format!("Failed to execute tmux {}", args[2]))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!("tmux {} failed: {}", args[2], stderr.trim());
            }
        }
        Ok(())
    }
}
