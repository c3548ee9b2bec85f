//! Side effects of a notification: running the click action and playing a sound

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use super::protocol::NotifyAction;

/// Runs a stored click action
pub trait ActionLauncher: Send + Sync {
    fn launch(&self, action: &NotifyAction) -> io::Result<()>;
}

/// Spawns the action as a detached child with null stdio
///
/// The child is reaped on a helper thread so it never lingers as a zombie.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ActionLauncher for ProcessLauncher {
    fn launch(&self, action: &NotifyAction) -> io::Result<()> {
        let mut child = Command::new(&action.executable)
            .args(&action.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let pid = child.id();
        std::thread::spawn(move || match child.wait() {
            Ok(status) => debug!(pid, %status, "Action process exited"),
            Err(e) => warn!(pid, "Failed to wait for action process: {}", e),
        });
        Ok(())
    }
}

/// Plays a notification sound, fire-and-forget
pub trait SoundPlayer: Send + Sync {
    fn play(&self, sound: &str);
}

/// Map a sound name to a playable file path
///
/// `None`, blank and `"none"` (any case) mean silence. Names containing `/`
/// or `.` are taken as paths; bare names resolve to `<directory>/<name>.<extension>`.
pub fn resolve_sound(sound: Option<&str>, directory: &Path, extension: &str) -> Option<PathBuf> {
    let name = sound?.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        return None;
    }
    if name.contains('/') || name.contains('.') {
        return Some(PathBuf::from(name));
    }
    Some(directory.join(format!("{}.{}", name, extension)))
}

/// Plays sounds through an external player such as `afplay` or `paplay`
#[derive(Debug, Clone)]
pub struct CommandSoundPlayer {
    player: PathBuf,
    directory: PathBuf,
    extension: String,
}

impl CommandSoundPlayer {
    pub fn new(
        player: impl Into<PathBuf>,
        directory: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            player: player.into(),
            directory: directory.into(),
            extension: extension.into(),
        }
    }

    pub fn resolve(&self, sound: &str) -> Option<PathBuf> {
        resolve_sound(Some(sound), &self.directory, &self.extension)
    }
}

impl SoundPlayer for CommandSoundPlayer {
    fn play(&self, sound: &str) {
        let Some(path) = self.resolve(sound) else {
            return;
        };

        let spawned = Command::new(&self.player)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => debug!(
                "Failed to play sound {} with {}: {}",
                path.display(),
                self.player.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_bare_name() {
        let resolved = resolve_sound(Some("Ping"), Path::new("/System/Library/Sounds"), "aiff");
        assert_eq!(
            resolved,
            Some(PathBuf::from("/System/Library/Sounds/Ping.aiff"))
        );
    }

    #[test]
    fn test_resolve_path_as_is() {
        let dir = Path::new("/sounds");
        assert_eq!(
            resolve_sound(Some("/tmp/ding.wav"), dir, "aiff"),
            Some(PathBuf::from("/tmp/ding.wav"))
        );
        assert_eq!(
            resolve_sound(Some("ding.wav"), dir, "aiff"),
            Some(PathBuf::from("ding.wav"))
        );
    }

    #[test]
    fn test_resolve_silence() {
        let dir = Path::new("/sounds");
        assert_eq!(resolve_sound(None, dir, "aiff"), None);
        assert_eq!(resolve_sound(Some(""), dir, "aiff"), None);
        assert_eq!(resolve_sound(Some("  "), dir, "aiff"), None);
        assert_eq!(resolve_sound(Some("none"), dir, "aiff"), None);
        assert_eq!(resolve_sound(Some("NONE"), dir, "aiff"), None);
    }

    #[test]
    fn test_missing_player_is_ignored() {
        let player = CommandSoundPlayer::new("/nonexistent/player", "/sounds", "oga");
        player.play("bell");
    }

    #[test]
    fn test_process_launcher_runs_action() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("clicked");
        let action = NotifyAction {
            executable: "/usr/bin/touch".to_string(),
            arguments: vec![marker.to_string_lossy().to_string()],
        };
        if !Path::new(&action.executable).exists() {
            return;
        }

        ProcessLauncher.launch(&action).unwrap();

        for _ in 0..50 {
            if marker.exists() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("action did not run");
    }

    #[test]
    fn test_process_launcher_reports_spawn_failure() {
        let action = NotifyAction {
            executable: "/nonexistent/bin/tool".to_string(),
            arguments: vec![],
        };
        assert!(ProcessLauncher.launch(&action).is_err());
    }
}
