use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::client::Bootstrap;
use crate::agent::store::DEFAULT_RETENTION_DAYS;

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// ログレベル
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// エージェント設定
    #[serde(default)]
    pub agent: AgentConfig,
    /// 通知音設定
    #[serde(default)]
    pub sound: SoundConfig,
    /// ターミナル設定
    #[serde(default)]
    pub terminal: TerminalConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            agent: AgentConfig::default(),
            sound: SoundConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み（存在しない場合はデフォルト）
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// 設定ファイルパスを取得
    pub fn config_path() -> Result<PathBuf> {
        // ~/.config/pane-notifier/config.toml を使用
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/pane-notifier/config.toml"))
    }
}

/// エージェント設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// ソケットパス（未設定時はランタイムディレクトリ）
    pub socket_path: Option<PathBuf>,
    /// アクションストアのパス
    pub actions_path: Option<PathBuf>,
    /// アクション保持日数
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// エージェント起動待ちタイムアウト
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    /// 起動確認のポーリング間隔
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS as u32
}

fn default_start_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            actions_path: None,
            retention_days: default_retention_days(),
            start_timeout_ms: default_start_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AgentConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(crate::agent::socket_path)
    }

    pub fn actions_path(&self) -> PathBuf {
        self.actions_path
            .clone()
            .unwrap_or_else(crate::agent::actions_path)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn bootstrap(&self) -> Bootstrap {
        Bootstrap {
            timeout: Duration::from_millis(self.start_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// 通知音設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundConfig {
    /// デフォルトの通知音（"none" で無音）
    #[serde(default = "default_sound_name")]
    pub default: String,
    /// 名前だけ指定された通知音を探すディレクトリ
    #[serde(default = "default_sound_directory")]
    pub directory: PathBuf,
    /// 通知音ファイルの拡張子
    #[serde(default = "default_sound_extension")]
    pub extension: String,
    /// 再生コマンド
    #[serde(default = "default_sound_player")]
    pub player: PathBuf,
}

#[cfg(target_os = "macos")]
fn default_sound_name() -> String {
    "Glass".to_string()
}

#[cfg(not(target_os = "macos"))]
fn default_sound_name() -> String {
    "complete".to_string()
}

#[cfg(target_os = "macos")]
fn default_sound_directory() -> PathBuf {
    PathBuf::from("/System/Library/Sounds")
}

#[cfg(not(target_os = "macos"))]
fn default_sound_directory() -> PathBuf {
    PathBuf::from("/usr/share/sounds/freedesktop/stereo")
}

#[cfg(target_os = "macos")]
fn default_sound_extension() -> String {
    "aiff".to_string()
}

#[cfg(not(target_os = "macos"))]
fn default_sound_extension() -> String {
    "oga".to_string()
}

#[cfg(target_os = "macos")]
fn default_sound_player() -> PathBuf {
    PathBuf::from("/usr/bin/afplay")
}

#[cfg(not(target_os = "macos"))]
fn default_sound_player() -> PathBuf {
    PathBuf::from("paplay")
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            default: default_sound_name(),
            directory: default_sound_directory(),
            extension: default_sound_extension(),
            player: default_sound_player(),
        }
    }
}

/// ターミナル設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// デフォルトのターミナル（キー、エイリアス、バンドルID）
    pub default: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.agent.retention_days, 7);
        assert_eq!(config.agent.bootstrap().timeout, Duration::from_millis(3000));
        assert_eq!(config.agent.bootstrap().poll_interval, Duration::from_millis(100));
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[agent]
socket_path = "/tmp/pn-test.sock"
retention_days = 2

[sound]
default = "none"

[terminal]
default = "wezterm"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.agent.socket_path(), PathBuf::from("/tmp/pn-test.sock"));
        assert_eq!(config.agent.retention(), chrono::Duration::days(2));
        assert_eq!(config.agent.start_timeout_ms, 3000);
        assert_eq!(config.agent.actions_path(), crate::agent::actions_path());
        assert_eq!(config.sound.default, "none");
        assert_eq!(config.sound.extension, default_sound_extension());
        assert_eq!(config.terminal.default.as_deref(), Some("wezterm"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = [").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
