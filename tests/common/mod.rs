// ABOUTME: Shared test fixtures: a scripted container runtime and an in-process fake REPL backend

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use repl_box::config::ReplConfig;
use repl_box::docker::{ContainerError, ContainerRuntime, ContainerSpec};
use repl_box::session::{SessionLifecycleManager, SessionRegistry};

/// Container runtime that keeps its containers in a HashMap instead of a
/// Docker daemon, and addresses them all at the fake backend's listener.
pub struct FakeRuntime {
    endpoint: String,
    containers: Mutex<HashMap<String, bool>>,
    pub run_calls: AtomicUsize,
    pub stopped: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new(endpoint: String) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            containers: Mutex::new(HashMap::new()),
            run_calls: AtomicUsize::new(0),
            stopped: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        })
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers.lock().unwrap().keys().cloned().collect()
    }

    pub fn stopped_names(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn removed_names(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run_detached(&self, spec: ContainerSpec) -> Result<(), ContainerError> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(ContainerError::AlreadyExists(spec.name));
        }
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        containers.insert(spec.name, true);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        Ok(self.containers.lock().unwrap().contains_key(name))
    }

    async fn is_running(&self, name: &str) -> Result<bool, ContainerError> {
        Ok(*self.containers.lock().unwrap().get(name).unwrap_or(&false))
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        if let Some(running) = self.containers.lock().unwrap().get_mut(name) {
            *running = false;
        }
        self.stopped.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn wait_stopped(&self, _name: &str) -> Result<(), ContainerError> {
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        self.containers.lock().unwrap().remove(name);
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn endpoint(&self, _name: &str, _port: u16) -> String {
        self.endpoint.clone()
    }
}

/// What the fake backend records and how tests drive it.
pub struct FakeBackend {
    pub addr: SocketAddr,
    /// Flip to false to make the health probe fail forever.
    pub alive: Arc<AtomicBool>,
    /// Bodies of activation POSTs, in arrival order.
    pub activations: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Text frames the backend received over its websocket.
    pub received: Arc<Mutex<Vec<String>>>,
    /// Messages sent here are emitted by the backend's websocket.
    pub feed: broadcast::Sender<String>,
}

#[derive(Clone)]
struct BackendState {
    alive: Arc<AtomicBool>,
    activations: Arc<Mutex<Vec<Vec<u8>>>>,
    received: Arc<Mutex<Vec<String>>>,
    feed: broadcast::Sender<String>,
}

/// Stand-in for a REPL container: health endpoint, activation endpoint, and
/// a websocket that emits whatever the test feeds it.
pub async fn spawn_fake_backend() -> FakeBackend {
    let alive = Arc::new(AtomicBool::new(true));
    let activations = Arc::new(Mutex::new(Vec::new()));
    let received = Arc::new(Mutex::new(Vec::new()));
    let (feed, _) = broadcast::channel(64);

    let state = BackendState {
        alive: Arc::clone(&alive),
        activations: Arc::clone(&activations),
        received: Arc::clone(&received),
        feed: feed.clone(),
    };

    let app = Router::new()
        .route("/is_alive", get(backend_is_alive))
        .route("/", get(backend_ws).post(backend_activate))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeBackend {
        addr,
        alive,
        activations,
        received,
        feed,
    }
}

async fn backend_is_alive(State(state): State<BackendState>) -> StatusCode {
    if state.alive.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn backend_activate(
    State(state): State<BackendState>,
    body: axum::body::Bytes,
) -> StatusCode {
    state.activations.lock().unwrap().push(body.to_vec());
    StatusCode::OK
}

async fn backend_ws(
    State(state): State<BackendState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| backend_ws_session(socket, state))
}

async fn backend_ws_session(socket: WebSocket, state: BackendState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut feed_rx = state.feed.subscribe();

    loop {
        tokio::select! {
            fed = feed_rx.recv() => match fed {
                Ok(text) => {
                    if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    state.received.lock().unwrap().push(text);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}

/// Config tuned for tests: same shape as production, much shorter waits.
pub fn test_repl_config() -> ReplConfig {
    ReplConfig {
        ready_timeout_ms: 2_000,
        ready_poll_interval_ms: 25,
        ..ReplConfig::default()
    }
}

pub struct TestHarness {
    pub backend: FakeBackend,
    pub runtime: Arc<FakeRuntime>,
    pub manager: Arc<SessionLifecycleManager>,
    pub registry: Arc<SessionRegistry>,
}

pub async fn harness_with_config(config: ReplConfig) -> TestHarness {
    let backend = spawn_fake_backend().await;
    let runtime = FakeRuntime::new(backend.addr.to_string());
    let dyn_runtime: Arc<dyn ContainerRuntime> = Arc::clone(&runtime) as Arc<dyn ContainerRuntime>;
    let manager = Arc::new(SessionLifecycleManager::new(dyn_runtime, config));
    let registry = Arc::new(SessionRegistry::new());
    TestHarness {
        backend,
        runtime,
        manager,
        registry,
    }
}

pub async fn harness() -> TestHarness {
    harness_with_config(test_repl_config()).await
}

/// Poll until `predicate` holds or two seconds elapse.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
