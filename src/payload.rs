//! Focus payload codec
//!
//! A notification fired from a tmux pane carries everything needed to bring
//! that pane back to the front later, possibly from another process after the
//! original shell has exited. The payload is serialized to JSON and wrapped in
//! standard base64 so it can travel as a single command-line argument.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::multiplexer::TmuxContext;
use crate::terminal::TerminalProfile;

/// Session coordinates plus terminal identity, replayed by `focus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FocusPayload {
    pub tmux: TmuxContext,
    pub terminal: TerminalProfile,
}

/// Errors raised while decoding a focus token
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("focus payload is required")]
    Missing,

    #[error("invalid focus payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("invalid focus payload: decoded bytes are not UTF-8")]
    InvalidUtf8,

    #[error("failed to parse focus payload JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("focus payload validation failed: {0}")]
    Schema(serde_json::Error),

    #[error("failed to serialize focus payload: {0}")]
    Encode(serde_json::Error),
}

/// Serialize a payload into an opaque, argv-safe token
pub fn encode(payload: &FocusPayload) -> Result<String, PayloadError> {
    let json = serde_json::to_vec(payload).map_err(PayloadError::Encode)?;
    Ok(STANDARD.encode(json))
}

/// Decode and validate a token produced by [`encode`]
///
/// Validation is all-or-nothing: any framing, JSON or schema problem is an
/// error and no partial payload is ever returned.
pub fn decode(token: &str) -> Result<FocusPayload, PayloadError> {
    if token.is_empty() {
        return Err(PayloadError::Missing);
    }

    let bytes = STANDARD.decode(token)?;
    let text = String::from_utf8(bytes).map_err(|_| PayloadError::InvalidUtf8)?;

    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(PayloadError::InvalidJson)?;
    serde_json::from_value(value).map_err(PayloadError::Schema)
}

/// The "run later" command a notification click executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FocusCommand {
    /// Absolute path of the binary to run
    pub executable: String,
    /// Arguments passed to the binary
    pub args: Vec<String>,
    /// Encoded payload embedded in `args`
    pub payload: String,
}

/// Extra flags forwarded to the focus invocation
#[derive(Debug, Clone, Default)]
pub struct FocusCommandOptions {
    pub verbose: bool,
    pub log_file: Option<String>,
}

impl FocusCommand {
    /// Shell-quoted rendering, used for dry runs and diagnostics
    pub fn to_shell(&self) -> String {
        std::iter::once(self.executable.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the focus command for `payload`, run through `executable`
pub fn build_focus_command(
    payload: &FocusPayload,
    executable: &Path,
    options: &FocusCommandOptions,
) -> Result<FocusCommand, PayloadError> {
    let encoded = encode(payload)?;

    let mut args = vec![
        "focus".to_string(),
        "--payload".to_string(),
        encoded.clone(),
    ];
    if options.verbose {
        args.push("--verbose".to_string());
    }
    if let Some(log_file) = &options.log_file {
        args.push("--log-file".to_string());
        args.push(log_file.clone());
    }

    Ok(FocusCommand {
        executable: executable.to_string_lossy().to_string(),
        args,
        payload: encoded,
    })
}

/// Single-quote a value for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
