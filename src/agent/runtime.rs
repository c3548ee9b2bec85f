//! Agent runtime
//!
//! Accepts one request per connection, runs it through [`Dispatcher`] and
//! routes notification clicks and dismissals back to the action store.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use super::center::{
    Authorization, Notification, NotificationCenter, NotificationResponse, ResponseKind,
};
use super::launch::{ActionLauncher, SoundPlayer};
use super::protocol::{self, AgentResponse, FailureCode, NotifyRequest};
use super::store::ActionStore;
use super::transport::{self, TransportError};

/// Back-off after a failed accept so a persistent error does not spin
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Synchronous request handling and click routing
///
/// Everything here may block (permission prompt, enqueue acknowledgement),
/// so the async runtime calls it from blocking tasks.
pub struct Dispatcher {
    store: Arc<ActionStore>,
    center: Arc<dyn NotificationCenter>,
    launcher: Arc<dyn ActionLauncher>,
    sounds: Arc<dyn SoundPlayer>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<ActionStore>,
        center: Arc<dyn NotificationCenter>,
        launcher: Arc<dyn ActionLauncher>,
        sounds: Arc<dyn SoundPlayer>,
    ) -> Self {
        Self {
            store,
            center,
            launcher,
            sounds,
        }
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    /// Handle one raw message; `None` means nothing should be written back
    pub fn handle_input(&self, input: &[u8]) -> Option<AgentResponse> {
        if input.is_empty() {
            debug!("Empty request, closing connection");
            return None;
        }

        match protocol::decode_request(input) {
            Ok(request) => Some(self.handle_request(request)),
            Err(e) => {
                warn!("Rejected malformed request: {}", e);
                Some(AgentResponse::failure(FailureCode::BadRequest, e.to_string()))
            }
        }
    }

    pub fn handle_request(&self, request: NotifyRequest) -> AgentResponse {
        let request_id = request.request_id.as_str();

        if !self.is_authorized() {
            warn!(request_id, "Notification permission denied");
            return AgentResponse::failure(
                FailureCode::PermissionDenied,
                "Notification permission is not granted",
            );
        }

        if !Path::new(&request.action.executable).is_absolute() {
            warn!(request_id, executable = %request.action.executable, "Rejected relative action path");
            return AgentResponse::failure(
                FailureCode::InvalidAction,
                format!(
                    "action.executable must be an absolute path: {}",
                    request.action.executable
                ),
            );
        }

        if let Err(e) = self.store.save(request_id, &request.action) {
            error!(request_id, "Failed to persist action: {}", e);
            return AgentResponse::failure(FailureCode::BadRequest, e.to_string());
        }

        if let Some(sound) = request.sound.as_deref() {
            self.sounds.play(sound);
        }

        let notification = Notification {
            request_id: request.request_id.clone(),
            title: request.title.clone(),
            message: request.message.clone(),
        };
        if let Err(e) = self.center.enqueue(&notification) {
            warn!(request_id, "Failed to enqueue notification: {}", e);
            if let Err(rollback) = self.store.remove(request_id) {
                error!(request_id, "Failed to roll back action: {}", rollback);
            }
            return AgentResponse::failure(FailureCode::EnqueueFailed, e.to_string());
        }

        info!(request_id, title = %request.title, "Notification queued");
        AgentResponse::success(request.request_id, Utc::now())
    }

    fn is_authorized(&self) -> bool {
        match self.center.authorization_status() {
            Authorization::Authorized => true,
            Authorization::Denied => false,
            Authorization::NotDetermined => {
                info!("Requesting notification permission");
                self.center.request_authorization()
            }
        }
    }

    /// React to a click or dismissal
    ///
    /// Missing actions (consumed, expired or dismissed) are ignored.
    pub fn handle_response(&self, response: &NotificationResponse) {
        let request_id = response.request_id.as_str();
        match &response.kind {
            ResponseKind::Dismissed => {
                debug!(request_id, "Notification dismissed");
                if let Err(e) = self.store.remove(request_id) {
                    warn!(request_id, "Failed to remove dismissed action: {}", e);
                }
            }
            ResponseKind::Failed(reason) => {
                warn!(request_id, "Notification was not displayed: {}", reason);
                if let Err(e) = self.store.remove(request_id) {
                    warn!(request_id, "Failed to remove undisplayed action: {}", e);
                }
            }
            ResponseKind::DefaultActivation | ResponseKind::FocusAction => {
                self.run_action(request_id);
            }
            ResponseKind::Other(action) => {
                debug!(request_id, action = %action, "Ignoring unknown notification action");
            }
        }
    }

    fn run_action(&self, request_id: &str) {
        let action = match self.store.take(request_id) {
            Ok(Some(action)) => action,
            Ok(None) => {
                debug!(request_id, "No pending action");
                return;
            }
            Err(e) => {
                warn!(request_id, "Failed to load action: {}", e);
                return;
            }
        };

        info!(request_id, executable = %action.executable, "Running notification action");
        if let Err(e) = self.launcher.launch(&action) {
            warn!(request_id, "Failed to launch {}: {}", action.executable, e);
        }
    }
}

/// Long-lived agent process: socket listener plus response routing
pub struct AgentRuntime {
    socket_path: PathBuf,
    dispatcher: Arc<Dispatcher>,
}

impl AgentRuntime {
    pub fn new(socket_path: impl Into<PathBuf>, dispatcher: Dispatcher) -> Self {
        Self {
            socket_path: socket_path.into(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Bind the socket and serve until the task is dropped
    pub async fn run(
        &self,
        responses: UnboundedReceiver<NotificationResponse>,
    ) -> Result<(), TransportError> {
        let listener = transport::bind_listener(&self.socket_path)?;
        info!("Agent listening at: {}", self.socket_path.display());

        tokio::spawn(route_responses(self.dispatcher(), responses));
        self.serve(listener).await
    }

    /// Accept loop; per-connection failures never stop the server
    pub async fn serve(&self, listener: UnixListener) -> Result<(), TransportError> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let dispatcher = self.dispatcher();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatcher).await {
                            debug!("Connection ended early: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), TransportError> {
    let input = match transport::read_message(&mut stream).await {
        Ok(input) => input,
        Err(e @ TransportError::MessageTooLarge(_)) => {
            warn!("Rejected request: {}", e);
            let response = AgentResponse::failure(FailureCode::BadRequest, e.to_string());
            write_response(&mut stream, &response).await;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let response = match tokio::task::spawn_blocking(move || dispatcher.handle_input(&input)).await
    {
        Ok(Some(response)) => response,
        Ok(None) => return Ok(()),
        Err(e) => {
            error!("Request handler failed: {}", e);
            AgentResponse::failure(FailureCode::BadRequest, "internal error")
        }
    };

    write_response(&mut stream, &response).await;
    Ok(())
}

async fn write_response(stream: &mut UnixStream, response: &AgentResponse) {
    let data = match protocol::encode_response(response) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to encode response: {}", e);
            return;
        }
    };

    // Peer may already be gone
    if let Err(e) = transport::write_message(stream, &data).await {
        debug!("Failed to write response: {}", e);
    }
}

async fn route_responses(
    dispatcher: Arc<Dispatcher>,
    mut responses: UnboundedReceiver<NotificationResponse>,
) {
    while let Some(response) = responses.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::task::spawn_blocking(move || dispatcher.handle_response(&response));
    }
    debug!("Notification response channel closed");
}
