//! Unix domain socket transport
//!
//! The agent side is async (tokio); clients are short-lived and use blocking
//! std sockets. Each connection carries a single request/response pair and the
//! writer signals the end of its message by shutting down its write half.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Size of `sockaddr_un.sun_path`, including the trailing NUL
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

/// Largest request or response accepted on a connection
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unix socket path is too long: {}", .0.display())]
    PathTooLong(PathBuf),

    #[error("Another agent is already listening on {}", .0.display())]
    AlreadyListening(PathBuf),

    #[error("Message too large: more than {0} bytes")]
    MessageTooLarge(usize),

    #[error("{op} failed ({}): {source}", .source.raw_os_error().unwrap_or(-1))]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| TransportError::Io { op, source }
    }

    /// Underlying OS error code, when there is one
    pub fn code(&self) -> Option<i32> {
        match self {
            TransportError::PathTooLong(_)
            | TransportError::AlreadyListening(_)
            | TransportError::MessageTooLarge(_) => None,
            TransportError::Io { source, .. } => source.raw_os_error(),
        }
    }

    /// True when nothing is bound or listening at the path
    pub fn is_not_listening(&self) -> bool {
        match self {
            TransportError::PathTooLong(_)
            | TransportError::AlreadyListening(_)
            | TransportError::MessageTooLarge(_) => false,
            TransportError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ),
        }
    }
}

fn check_path_len(path: &Path) -> Result<(), TransportError> {
    if path.as_os_str().len() >= SUN_PATH_LEN {
        return Err(TransportError::PathTooLong(path.to_path_buf()));
    }
    Ok(())
}

/// Bind the agent socket, replacing any stale socket file at `path`
///
/// A socket that still accepts connections is never unlinked.
/// Must be called from within a tokio runtime.
pub fn bind_listener(path: &Path) -> Result<UnixListener, TransportError> {
    check_path_len(path)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(TransportError::io("mkdir"))?;
    }

    // Checked immediately before the unlink; a check made earlier by the
    // caller can be stale by now.
    if is_reachable(path) {
        return Err(TransportError::AlreadyListening(path.to_path_buf()));
    }

    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed stale socket: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(TransportError::Io { op: "unlink", source: e }),
    }

    UnixListener::bind(path).map_err(TransportError::io("bind"))
}

/// Read until the peer shuts down its write half
///
/// Zero bytes is an empty message, not an error. Anything longer than
/// [`MAX_MESSAGE_BYTES`] is rejected without buffering the rest.
pub async fn read_message(stream: &mut UnixStream) -> Result<Vec<u8>, TransportError> {
    let mut data = Vec::new();
    (&mut *stream)
        .take(MAX_MESSAGE_BYTES as u64 + 1)
        .read_to_end(&mut data)
        .await
        .map_err(TransportError::io("read"))?;
    if data.len() > MAX_MESSAGE_BYTES {
        return Err(TransportError::MessageTooLarge(MAX_MESSAGE_BYTES));
    }
    Ok(data)
}

/// Write the whole message and close our write half
pub async fn write_message(stream: &mut UnixStream, data: &[u8]) -> Result<(), TransportError> {
    stream
        .write_all(data)
        .await
        .map_err(TransportError::io("write"))?;
    stream.shutdown().await.map_err(TransportError::io("shutdown"))?;
    Ok(())
}

/// Open a blocking client connection
pub fn connect(path: &Path) -> Result<StdUnixStream, TransportError> {
    check_path_len(path)?;
    StdUnixStream::connect(path).map_err(TransportError::io("connect"))
}

/// Liveness probe: connect and immediately close
pub fn is_reachable(path: &Path) -> bool {
    connect(path).is_ok()
}

/// Blocking counterpart of [`read_message`]
pub fn read_all<R: Read>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Io { op: "read", source: e }),
        }
    }
    Ok(data)
}

/// Blocking write of the whole buffer, retrying interrupted writes
pub fn write_all<W: Write>(writer: &mut W, data: &[u8]) -> Result<(), TransportError> {
    writer.write_all(data).map_err(TransportError::io("write"))?;
    writer.flush().map_err(TransportError::io("flush"))
}

/// Signal end-of-request to the agent
pub fn finish_request(stream: &StdUnixStream) -> Result<(), TransportError> {
    stream
        .shutdown(Shutdown::Write)
        .map_err(TransportError::io("shutdown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_liveness_probe() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");

        assert!(!is_reachable(&socket_path));

        let listener = bind_listener(&socket_path).unwrap();
        assert!(is_reachable(&socket_path));

        drop(listener);
        assert!(!is_reachable(&socket_path));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let _listener = bind_listener(&socket_path).unwrap();
        assert!(is_reachable(&socket_path));
    }

    #[tokio::test]
    async fn test_bind_refuses_live_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");

        let _first = bind_listener(&socket_path).unwrap();
        let err = bind_listener(&socket_path).unwrap_err();
        assert!(matches!(err, TransportError::AlreadyListening(_)));
        assert!(!err.is_not_listening());

        // The first listener keeps its socket file
        assert!(is_reachable(&socket_path));
    }

    #[test]
    fn test_connect_missing_socket_is_not_listening() {
        let dir = tempdir().unwrap();
        let err = connect(&dir.path().join("missing.sock")).unwrap_err();
        assert!(err.is_not_listening());
        assert!(err.code().is_some());
        assert!(err.to_string().starts_with("connect failed"));
    }

    #[test]
    fn test_path_too_long() {
        let long = PathBuf::from(format!("/tmp/{}.sock", "x".repeat(200)));
        assert!(matches!(connect(&long), Err(TransportError::PathTooLong(_))));
        assert!(!is_reachable(&long));
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = bind_listener(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_message(&mut stream).await.unwrap();
            write_message(&mut stream, b"pong\n").await.unwrap();
            request
        });

        let reply = tokio::task::spawn_blocking(move || {
            let mut stream = connect(&socket_path).unwrap();
            write_all(&mut stream, b"ping\n").unwrap();
            finish_request(&stream).unwrap();
            read_all(&mut stream).unwrap()
        })
        .await
        .unwrap();

        assert_eq!(reply, b"pong\n");
        assert_eq!(server.await.unwrap(), b"ping\n");
    }

    #[tokio::test]
    async fn test_empty_message_is_not_an_error() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = bind_listener(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_message(&mut stream).await.unwrap()
        });

        tokio::task::spawn_blocking(move || {
            let stream = connect(&socket_path).unwrap();
            finish_request(&stream).unwrap();
        })
        .await
        .unwrap();

        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = bind_listener(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_message(&mut stream).await
        });

        let client = tokio::task::spawn_blocking(move || {
            let mut stream = connect(&socket_path).unwrap();
            // The server stops reading at the limit, so this write may fail.
            let _ = write_all(&mut stream, &vec![b' '; MAX_MESSAGE_BYTES + 4096]);
            let _ = finish_request(&stream);
        });

        let err = server.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge(MAX_MESSAGE_BYTES)));
        assert!(err.to_string().starts_with("Message too large"));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_message_at_limit_is_accepted() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = bind_listener(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_message(&mut stream).await.unwrap()
        });

        tokio::task::spawn_blocking(move || {
            let mut stream = connect(&socket_path).unwrap();
            write_all(&mut stream, &vec![b' '; MAX_MESSAGE_BYTES]).unwrap();
            finish_request(&stream).unwrap();
        })
        .await
        .unwrap();

        assert_eq!(server.await.unwrap().len(), MAX_MESSAGE_BYTES);
    }
}
