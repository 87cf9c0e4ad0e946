// ABOUTME: Session lifecycle management: provisions backend containers, wires up the relay, tears everything down

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ReplConfig;
use crate::docker::{ContainerError, ContainerRuntime, ContainerSpec};
use crate::session::readiness::{self, HttpHealthProbe, ReadinessError};
use crate::session::relay::{Relay, RelayMessage};
use crate::session::SessionKey;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a session already exists for {0}")]
    Conflict(SessionKey),
    #[error("no session exists for {0}")]
    NotFound(SessionKey),
    #[error("backend for {key} did not become ready within {timeout:?}")]
    ReadyTimeout { key: SessionKey, timeout: Duration },
    #[error("REPL activation request failed: {0}")]
    Activation(#[from] reqwest::Error),
    #[error("backend websocket error: {0}")]
    Backend(#[from] tungstenite::Error),
    #[error("Container runtime error: {0}")]
    Runtime(#[from] ContainerError),
}

/// Where a session is in its life.
///
/// `Provisioning → Ready → Draining → Closed`, no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Provisioning,
    Ready,
    Draining,
    Closed,
}

/// One live backend container plus its relay state.
pub struct Session {
    key: SessionKey,
    container_name: String,
    created_at: DateTime<Utc>,
    state: std::sync::Mutex<SessionState>,
    relay: Arc<Relay>,
    /// Producer and backend-writer tasks, cancelled together at teardown.
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        key: SessionKey,
        container_name: String,
        relay: Arc<Relay>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            container_name,
            created_at: Utc::now(),
            state: std::sync::Mutex::new(SessionState::Provisioning),
            relay,
            tasks: std::sync::Mutex::new(tasks),
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mark_ready(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == SessionState::Provisioning {
            *state = SessionState::Ready;
        }
    }

    /// Begin teardown. Returns false if the session is already draining or
    /// closed, making teardown idempotent.
    fn begin_draining(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *state {
            SessionState::Provisioning | SessionState::Ready => {
                *state = SessionState::Draining;
                true
            }
            SessionState::Draining | SessionState::Closed => false,
        }
    }

    fn mark_closed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = SessionState::Closed;
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *tasks)
    }
}

/// Orchestrates container provisioning, readiness, relay startup and teardown.
pub struct SessionLifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    http: reqwest::Client,
    probe: HttpHealthProbe,
    config: ReplConfig,
}

impl SessionLifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ReplConfig) -> Self {
        let http = reqwest::Client::new();
        let probe = HttpHealthProbe::new(http.clone());
        Self {
            runtime,
            http,
            probe,
            config,
        }
    }

    pub fn config(&self) -> &ReplConfig {
        &self.config
    }

    /// Provision a backend container for `key`, wait until it accepts
    /// traffic, start its REPL with `file_bundle`, and wire up the relay.
    ///
    /// A container whose derived name already exists is sufficient evidence
    /// of a conflict; nothing is provisioned in that case. Failures after the
    /// container has started always attempt container cleanup before the
    /// error propagates, so a half-started backend is never leaked.
    pub async fn create_session(
        &self,
        key: &SessionKey,
        file_bundle: Vec<u8>,
    ) -> Result<Arc<Session>, SessionError> {
        let name = key.container_name(&self.config.container_prefix);

        if self.runtime.exists(&name).await? {
            return Err(SessionError::Conflict(key.clone()));
        }

        info!("starting container {}", name);
        let spec = ContainerSpec::new(
            self.config.image.clone(),
            name.clone(),
            self.config.network.clone(),
        )
        .with_user(self.config.container_user.clone());

        match self.runtime.run_detached(spec).await {
            Ok(()) => {}
            Err(ContainerError::AlreadyExists(_)) => {
                // Lost a race with a concurrent create for the same key.
                return Err(SessionError::Conflict(key.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        match self.connect_backend(key, &name, file_bundle).await {
            Ok(session) => Ok(session),
            Err(err) => {
                warn!("provisioning {} failed, cleaning up container: {}", key, err);
                self.cleanup_container(&name).await;
                Err(err)
            }
        }
    }

    /// Steps after the container is up: readiness wait, REPL activation,
    /// backend websocket, relay tasks.
    async fn connect_backend(
        &self,
        key: &SessionKey,
        name: &str,
        file_bundle: Vec<u8>,
    ) -> Result<Arc<Session>, SessionError> {
        let authority = self.runtime.endpoint(name, self.config.port);
        let health_url = format!("http://{authority}/is_alive");

        readiness::wait_until_ready(
            self.runtime.as_ref(),
            &self.probe,
            name,
            &health_url,
            self.config.ready_timeout(),
            self.config.ready_poll_interval(),
        )
        .await
        .map_err(|err| match err {
            ReadinessError::Timeout { .. } => SessionError::ReadyTimeout {
                key: key.clone(),
                timeout: self.config.ready_timeout(),
            },
            ReadinessError::Runtime(e) => SessionError::Runtime(e),
        })?;

        debug!("activating REPL on container {}", name);
        self.http
            .post(format!("http://{authority}/"))
            .body(file_bundle)
            .send()
            .await?
            .error_for_status()?;

        debug!("connecting websocket to REPL container {}", name);
        let (socket, _response) = connect_async(format!("ws://{authority}")).await?;

        let session = spawn_session(key.clone(), name.to_string(), socket);
        info!("session {} ready", key);
        Ok(session)
    }

    /// Tear a session down: cancel the relay tasks, close the backend
    /// channel, then stop, wait on, and remove the container.
    ///
    /// Every step is attempted even when an earlier one fails; destroying an
    /// already-closed session is a no-op.
    pub async fn destroy_session(&self, session: &Session) {
        if !session.begin_draining() {
            debug!("session {} already torn down", session.key());
            return;
        }

        info!("destroying session {}", session.key());
        session.relay().shutdown();
        for task in session.take_tasks() {
            // Aborting the writer task drops the backend socket, which
            // closes the duplex channel.
            task.abort();
        }

        self.cleanup_container(session.container_name()).await;
        session.mark_closed();
    }

    /// Destroy every remaining session. Called at process shutdown so no
    /// container outlives the service.
    pub async fn shutdown_all(&self, registry: &crate::session::SessionRegistry) {
        let sessions = registry.drain().await;
        if sessions.is_empty() {
            info!("no active sessions to clean up");
            return;
        }

        info!("cleaning up {} remaining session(s)", sessions.len());
        for (key, session) in sessions {
            debug!("cleaning up session {}", key);
            self.destroy_session(&session).await;
        }
    }

    /// Best-effort container teardown; failures are logged, never propagated,
    /// and never short-circuit the remaining steps.
    async fn cleanup_container(&self, name: &str) {
        if let Err(err) = self.runtime.stop(name).await {
            warn!("failed to stop container {}: {}", name, err);
        }
        if let Err(err) = self.runtime.wait_stopped(name).await {
            warn!("failed to wait on container {}: {}", name, err);
        }
        if let Err(err) = self.runtime.remove(name).await {
            warn!("failed to remove container {}: {}", name, err);
        }
    }
}

/// Split the backend socket and start the per-session tasks: a producer
/// draining backend frames into the relay's queue, and a writer draining
/// relayed client input back into the socket.
fn spawn_session(key: SessionKey, name: String, socket: BackendSocket) -> Arc<Session> {
    let (sink, stream) = socket.split();
    let (backend_tx, backend_rx) = mpsc::unbounded_channel();

    let relay = Arc::new(Relay::new(backend_tx));
    let producer = tokio::spawn(pump_backend_messages(stream, Arc::clone(&relay)));
    let writer = tokio::spawn(drive_backend_sink(backend_rx, sink));

    let session = Session::new(key, name, relay, vec![producer, writer]);
    session.mark_ready();
    session
}

/// Producer task: every frame the backend emits is queued in arrival order.
/// Exits quietly when the backend closes; closure is expected at teardown.
async fn pump_backend_messages(mut stream: SplitStream<BackendSocket>, relay: Arc<Relay>) {
    while let Some(received) = stream.next().await {
        match received {
            Ok(tungstenite::Message::Text(text)) => {
                debug!("from backend: {}", text);
                if !relay.ingest(RelayMessage::Text(text)) {
                    break;
                }
            }
            Ok(tungstenite::Message::Binary(data)) => {
                if !relay.ingest(RelayMessage::Binary(data)) {
                    break;
                }
            }
            Ok(tungstenite::Message::Close(_)) => {
                debug!("backend closed its websocket");
                break;
            }
            Ok(_) => {} // ping/pong keepalive traffic
            Err(err) => {
                debug!("backend websocket ended: {}", err);
                break;
            }
        }
    }
}

/// Writer task: forwards relayed client input onto the backend socket.
async fn drive_backend_sink(
    mut backend_rx: mpsc::UnboundedReceiver<RelayMessage>,
    mut sink: SplitSink<BackendSocket, tungstenite::Message>,
) {
    while let Some(msg) = backend_rx.recv().await {
        let frame = match msg {
            RelayMessage::Text(text) => tungstenite::Message::Text(text),
            RelayMessage::Binary(data) => tungstenite::Message::Binary(data),
        };
        if let Err(err) = sink.send(frame).await {
            debug!("backend websocket rejected write: {}", err);
            break;
        }
    }
    let _ = sink.close().await;
}
