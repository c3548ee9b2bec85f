//! Desktop notification collaborator
//!
//! The runtime only talks to [`NotificationCenter`]. User interaction comes
//! back asynchronously as [`NotificationResponse`] values on a channel.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Action identifier for the explicit "Return to pane" button
pub const FOCUS_ACTION_ID: &str = "focus-return";
/// Action identifier for clicking the notification body
pub const DEFAULT_ACTION_ID: &str = "default";

/// How long `notify-send` gets to fail before the notification counts as shown
const ACK_WINDOW: Duration = Duration::from_millis(300);
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Platform notification permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Denied,
    NotDetermined,
}

impl Authorization {
    pub fn label(&self) -> &'static str {
        match self {
            Authorization::Authorized => "authorized",
            Authorization::Denied => "denied",
            Authorization::NotDetermined => "notDetermined",
        }
    }
}

/// Content handed to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Correlates the notification with its stored action
    pub request_id: String,
    pub title: String,
    pub message: String,
}

/// How the user interacted with a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// Notification body clicked
    DefaultActivation,
    /// "Return to pane" button
    FocusAction,
    /// Closed without activation
    Dismissed,
    /// Any other action identifier
    Other(String),
    /// The platform gave up on the notification after accepting it
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    pub request_id: String,
    pub kind: ResponseKind,
}

pub type ResponseSender = UnboundedSender<NotificationResponse>;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct EnqueueError(pub String);

pub trait NotificationCenter: Send + Sync {
    /// Current permission state
    fn authorization_status(&self) -> Authorization;

    /// Prompt for permission, blocking until the user or OS decides
    fn request_authorization(&self) -> bool;

    /// Display `notification`, blocking until the platform acknowledges it
    fn enqueue(&self, notification: &Notification) -> Result<(), EnqueueError>;
}

/// Map `notify-send --wait` output to a response kind
pub fn parse_response_kind(output: &str) -> ResponseKind {
    match output.trim() {
        "" => ResponseKind::Dismissed,
        DEFAULT_ACTION_ID => ResponseKind::DefaultActivation,
        FOCUS_ACTION_ID => ResponseKind::FocusAction,
        other => ResponseKind::Other(other.to_string()),
    }
}

/// Interpret a finished `notify-send --wait`
///
/// A non-zero exit with no action printed means nothing was displayed.
fn classify_exit(status: ExitStatus, stdout: &str, stderr: &str) -> ResponseKind {
    if !status.success() && stdout.trim().is_empty() {
        return ResponseKind::Failed(exit_message(status, stderr));
    }
    parse_response_kind(stdout)
}

fn exit_message(status: ExitStatus, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("notify-send exited with {}", status)
    } else {
        format!("notify-send exited with {}: {}", status, stderr)
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut output = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut output);
    }
    output
}

/// Poll until `child` exits or `window` elapses
fn wait_briefly(child: &mut Child, window: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + window;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(ACK_POLL_INTERVAL);
    }
}

/// libnotify backend driven through `notify-send --wait`
///
/// One watcher thread per displayed notification waits for the process to
/// exit and reports the chosen action on the response channel.
pub struct NotifySendCenter {
    binary: Option<PathBuf>,
    app_name: String,
    responses: ResponseSender,
}

impl NotifySendCenter {
    pub fn new(binary: Option<PathBuf>, responses: ResponseSender) -> Self {
        Self {
            binary,
            app_name: env!("CARGO_PKG_NAME").to_string(),
            responses,
        }
    }

    /// Locate `notify-send` on PATH
    pub fn detect(responses: ResponseSender) -> Self {
        let binary = crate::binary::ensure_binary("notify-send", None).ok();
        if binary.is_none() {
            warn!("notify-send not found on PATH; notifications will be refused");
        }
        Self::new(binary, responses)
    }

    fn command_args(&self, notification: &Notification) -> Vec<String> {
        vec![
            format!("--app-name={}", self.app_name),
            "--wait".to_string(),
            format!("--action={}=Open", DEFAULT_ACTION_ID),
            format!("--action={}=Return to pane", FOCUS_ACTION_ID),
            "--".to_string(),
            notification.title.clone(),
            notification.message.clone(),
        ]
    }
}

impl NotificationCenter for NotifySendCenter {
    fn authorization_status(&self) -> Authorization {
        if self.binary.is_some() {
            Authorization::Authorized
        } else {
            Authorization::Denied
        }
    }

    fn request_authorization(&self) -> bool {
        self.binary.is_some()
    }

    fn enqueue(&self, notification: &Notification) -> Result<(), EnqueueError> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| EnqueueError("notify-send is not available".to_string()))?;

        let mut child = Command::new(binary)
            .args(self.command_args(notification))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EnqueueError(format!("Failed to run notify-send: {}", e)))?;

        // No D-Bus session, no daemon or an old libnotify rejecting --wait
        // all make notify-send exit straight away.
        let early = match wait_briefly(&mut child, ACK_WINDOW) {
            Ok(status) => status,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EnqueueError(format!("Failed to wait for notify-send: {}", e)));
            }
        };
        if let Some(status) = early {
            if !status.success() {
                let stderr = read_pipe(child.stderr.take());
                return Err(EnqueueError(exit_message(status, &stderr)));
            }
        }

        let request_id = notification.request_id.clone();
        let responses = self.responses.clone();
        std::thread::spawn(move || {
            let stdout = read_pipe(child.stdout.take());
            let stderr = read_pipe(child.stderr.take());
            let kind = match child.wait() {
                Ok(status) => classify_exit(status, &stdout, &stderr),
                Err(e) => ResponseKind::Failed(format!("Failed to wait for notify-send: {}", e)),
            };

            if let ResponseKind::Failed(reason) = &kind {
                warn!(request_id = %request_id, "Notification failed: {}", reason);
            } else {
                debug!(request_id = %request_id, ?kind, "Notification closed");
            }
            let _ = responses.send(NotificationResponse { request_id, kind });
        });

        Ok(())
    }
}
