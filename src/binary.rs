//! Executable discovery on PATH

use anyhow::Result;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn resolve_from_path(command: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let path_var = path_var.filter(|p| !p.is_empty())?;
    std::env::split_paths(path_var)
        .filter(|segment| !segment.as_os_str().is_empty())
        .map(|segment| segment.join(command))
        .find(|candidate| is_executable(candidate))
}

/// Resolve `command` to an absolute, executable path
///
/// An explicit path must be absolute and executable. Otherwise the first
/// executable match on `PATH` wins.
pub fn ensure_binary(command: &str, explicit_path: Option<&Path>) -> Result<PathBuf> {
    let path_var = std::env::var_os("PATH");
    ensure_binary_in(command, explicit_path, path_var.as_deref())
}

fn ensure_binary_in(
    command: &str,
    explicit_path: Option<&Path>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf> {
    if let Some(explicit) = explicit_path.filter(|p| !p.as_os_str().is_empty()) {
        if !explicit.is_absolute() {
            anyhow::bail!("The given path must be absolute: {}", explicit.display());
        }
        if !is_executable(explicit) {
            anyhow::bail!("Command is not executable: {}", explicit.display());
        }
        return Ok(explicit.to_path_buf());
    }

    resolve_from_path(command, path_var)
        .ok_or_else(|| anyhow::anyhow!("Unable to locate command on PATH: {}", command))
}
