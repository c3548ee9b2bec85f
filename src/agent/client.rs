//! Client side of the agent protocol

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::protocol::{self, AgentResponse, FailureCode, NotifyRequest, WireError};
use super::transport::{self, TransportError};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Notification agent did not start within {0:?}")]
    AgentStartFailed(Duration),

    #[error("Failed to launch notification agent: {0}")]
    Launch(#[source] io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to encode request: {0}")]
    Encode(#[source] WireError),

    #[error("Invalid response from agent: {0}")]
    InvalidResponse(#[source] WireError),

    #[error("Notification failed ({code}): {message}")]
    NotificationFailed { code: FailureCode, message: String },
}

/// Short-lived connection to the agent; one request per call
#[derive(Debug, Clone)]
pub struct AgentClient {
    socket_path: PathBuf,
    read_timeout: Option<Duration>,
}

impl AgentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            read_timeout: None,
        }
    }

    /// Bound the wait for the agent's reply
    ///
    /// Unbounded by default since the agent may be waiting on a permission prompt.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and return whatever the agent answered
    pub fn send(&self, request: &NotifyRequest) -> Result<AgentResponse, ClientError> {
        let data = protocol::encode_request(request).map_err(ClientError::Encode)?;

        let mut stream = transport::connect(&self.socket_path)?;
        stream
            .set_write_timeout(Some(WRITE_TIMEOUT))
            .map_err(|source| TransportError::Io { op: "setsockopt", source })?;
        stream
            .set_read_timeout(self.read_timeout)
            .map_err(|source| TransportError::Io { op: "setsockopt", source })?;

        transport::write_all(&mut stream, &data)?;
        transport::finish_request(&stream)?;
        let reply = transport::read_all(&mut stream)?;

        protocol::decode_response(&reply).map_err(ClientError::InvalidResponse)
    }

    /// Like [`send`](Self::send) but turns a failure response into an error
    pub fn notify(&self, request: &NotifyRequest) -> Result<AgentResponse, ClientError> {
        let response = self.send(request)?;
        if response.ok {
            return Ok(response);
        }
        Err(ClientError::NotificationFailed {
            code: response.code.unwrap_or(FailureCode::BadRequest),
            message: response.message.unwrap_or_default(),
        })
    }
}

/// How long to wait for a freshly launched agent
#[derive(Debug, Clone, Copy)]
pub struct Bootstrap {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Make sure an agent is reachable at `socket_path`, launching one if needed
///
/// Returns `true` when a new agent had to be launched.
pub fn ensure_running<F>(
    socket_path: &Path,
    bootstrap: &Bootstrap,
    launch: F,
) -> Result<bool, ClientError>
where
    F: FnOnce() -> io::Result<()>,
{
    if transport::is_reachable(socket_path) {
        return Ok(false);
    }

    tracing::info!("Starting notification agent for {}", socket_path.display());
    launch().map_err(ClientError::Launch)?;

    let deadline = Instant::now() + bootstrap.timeout;
    loop {
        if transport::is_reachable(socket_path) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Err(ClientError::AgentStartFailed(bootstrap.timeout));
        }
        std::thread::sleep(bootstrap.poll_interval);
    }
}

/// Launch `<current exe> agent run` detached from the calling terminal
pub fn launch_agent(extra_args: &[String]) -> io::Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let mut child = Command::new(exe)
        .args(["agent", "run"])
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;

    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::protocol::NotifyAction;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    fn fast() -> Bootstrap {
        Bootstrap {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
        }
    }

    fn sample_request() -> NotifyRequest {
        NotifyRequest::new(
            "r1",
            "Build",
            "Done",
            None,
            NotifyAction {
                executable: "/bin/echo".to_string(),
                arguments: vec![],
            },
        )
    }

    fn serve_once(listener: UnixListener, reply: &'static [u8]) -> std::thread::JoinHandle<Vec<u8>> {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = transport::read_all(&mut stream).unwrap();
            transport::write_all(&mut stream, reply).unwrap();
            request
        })
    }

    #[test]
    fn test_already_running_skips_launch() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let _listener = UnixListener::bind(&socket_path).unwrap();

        let launched = ensure_running(&socket_path, &fast(), || panic!("should not launch"));
        assert!(!launched.unwrap());
    }

    #[test]
    fn test_launch_then_reachable() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let mut holder = None;

        let launched = ensure_running(&socket_path, &fast(), || {
            holder = Some(UnixListener::bind(&socket_path)?);
            Ok(())
        });
        assert!(launched.unwrap());
        assert!(holder.is_some());
    }

    #[test]
    fn test_agent_start_failed_after_deadline() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");

        let started = Instant::now();
        let result = ensure_running(&socket_path, &fast(), || Ok(()));
        assert!(matches!(result, Err(ClientError::AgentStartFailed(_))));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_launch_error_is_reported() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");

        let result = ensure_running(&socket_path, &fast(), || {
            Err(io::Error::new(io::ErrorKind::NotFound, "no binary"))
        });
        assert!(matches!(result, Err(ClientError::Launch(_))));
    }

    #[test]
    fn test_send_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let server = serve_once(
            listener,
            b"{\"ok\":true,\"request_id\":\"r1\",\"queued_at\":\"2026-10-17T09:30:00.125Z\"}\n",
        );

        let response = AgentClient::new(&socket_path).send(&sample_request()).unwrap();
        assert!(response.ok);
        assert_eq!(response.request_id.as_deref(), Some("r1"));

        let sent = server.join().unwrap();
        let decoded = protocol::decode_request(&sent).unwrap();
        assert_eq!(decoded, sample_request());
    }

    #[test]
    fn test_notify_surfaces_failure_code() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let server = serve_once(
            listener,
            b"{\"ok\":false,\"code\":\"permission_denied\",\"message\":\"no\"}\n",
        );

        let err = AgentClient::new(&socket_path)
            .notify(&sample_request())
            .unwrap_err();
        match err {
            ClientError::NotificationFailed { code, message } => {
                assert_eq!(code, FailureCode::PermissionDenied);
                assert_eq!(message, "no");
            }
            other => panic!("unexpected error: {}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_invalid_response() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let server = serve_once(listener, b"");

        let err = AgentClient::new(&socket_path)
            .send(&sample_request())
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse(WireError::EmptyPayload)
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_send_without_agent() {
        let dir = tempdir().unwrap();
        let err = AgentClient::new(dir.path().join("agent.sock"))
            .send(&sample_request())
            .unwrap_err();
        match err {
            ClientError::Transport(e) => assert!(e.is_not_listening()),
            other => panic!("unexpected error: {}", other),
        }
    }
}
