use anyhow::{Context, Result};
use std::process::Command;

const OSASCRIPT: &str = "/usr/bin/osascript";

/// Escape a value for embedding inside an AppleScript string literal
fn escape_applescript(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}

fn activation_script(bundle_id: &str) -> String {
    format!(
        "tell application id \"{}\" to activate",
        escape_applescript(bundle_id)
    )
}

/// Hand focus away from NotificationCenter and raise the terminal process
fn frontmost_script(bundle_id: &str) -> String {
    format!(
        r#"
tell application "System Events"
  try
    if name of processes contains "NotificationCenter" then
      tell process "NotificationCenter" to set frontmost to false
    end if
  end try
  repeat with proc in processes
    try
      if bundle identifier of proc is "{}" then
        set frontmost of proc to true
        exit repeat
      end if
    end try
  end repeat
end tell
"#,
        escape_applescript(bundle_id)
    )
}

fn run_osascript(script: &str) -> Result<()> {
    let output = Command::new(OSASCRIPT)
        .args(["-e", script])
        .output()
        .context("Failed to execute osascript")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("osascript failed: {}", stderr.trim());
    }
    Ok(())
}

/// Bring the terminal identified by `bundle_id` to the foreground
///
/// The frontmost step always runs; its failure is only reported when the
/// primary activation failed as well.
pub fn activate_terminal(bundle_id: &str) -> Result<()> {
    activate_with(bundle_id, run_osascript)
}

fn activate_with<F>(bundle_id: &str, mut run: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let primary = run(&activation_script(bundle_id));
    if let Err(e) = &primary {
        tracing::debug!("Terminal activation failed, trying frontmost script: {}", e);
    }

    match run(&frontmost_script(bundle_id)) {
        Ok(()) => Ok(()),
        Err(e) if primary.is_ok() => {
            tracing::debug!("Ignoring frontmost script failure: {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
