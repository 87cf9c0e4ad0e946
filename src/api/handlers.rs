// ABOUTME: HTTP and websocket request handlers for the REPL session routes

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::ApiError;
use super::state::AppState;
use crate::session::{RelayMessage, Session, SessionKey};

#[derive(Serialize)]
pub struct ProbeResponse {
    status: &'static str,
}

/// GET /is_alive
pub async fn is_alive() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "ok" })
}

#[derive(Serialize)]
pub struct VersionResponse {
    version: &'static str,
}

/// GET /sha
pub async fn sha() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /repl/:exercise/:participant
///
/// The body is the file bundle to inject into the REPL, forwarded to the
/// backend verbatim.
pub async fn create_repl(
    State(state): State<AppState>,
    Path((exercise, participant)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let key = SessionKey::new(&exercise, &participant);

    // Cheap early rejection; the authoritative conflict check is against the
    // container runtime's namespace inside create_session.
    if state.registry.lookup(&key).await.is_ok() {
        return Err(ApiError::Conflict(format!(
            "a session already exists for {key}"
        )));
    }

    let session = state.sessions.create_session(&key, body.to_vec()).await?;

    if let Err(err) = state.registry.register(key.clone(), Arc::clone(&session)).await {
        // A concurrent create for the same key won the registration race;
        // tear our copy down and report the conflict.
        state.sessions.destroy_session(&session).await;
        return Err(err.into());
    }

    info!("created REPL session {}", key);
    Ok(StatusCode::CREATED)
}

/// DELETE /repl/:exercise/:participant
pub async fn delete_repl(
    State(state): State<AppState>,
    Path((exercise, participant)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let key = SessionKey::new(&exercise, &participant);

    let session = state.registry.unregister(&key).await?;
    state.sessions.destroy_session(&session).await;

    info!("deleted REPL session {}", key);
    Ok(StatusCode::OK)
}

/// GET /repl/:exercise/:participant with a websocket upgrade.
///
/// The upgraded connection is attached as the session's client for as long
/// as it stays open.
pub async fn attach_repl(
    State(state): State<AppState>,
    Path((exercise, participant)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let key = SessionKey::new(&exercise, &participant);
    let session = state.registry.lookup(&key).await?;

    info!("attaching client websocket to {}", key);
    Ok(ws.on_upgrade(move |socket| handle_client_socket(socket, key, session)))
}

/// Pump frames between the client websocket and the session's relay until
/// one side goes away.
async fn handle_client_socket(socket: WebSocket, key: SessionKey, session: Arc<Session>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<RelayMessage>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<RelayMessage>();

    // Relay → client.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let frame = match msg {
                RelayMessage::Text(text) => WsMessage::Text(text),
                RelayMessage::Binary(data) => WsMessage::Binary(data),
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Client → relay.
    let recv_task = tokio::spawn(async move {
        while let Some(received) = ws_rx.next().await {
            match received {
                Ok(WsMessage::Text(text)) => {
                    if inbound_tx.send(RelayMessage::Text(text)).is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Binary(data)) => {
                    if inbound_tx.send(RelayMessage::Binary(data)).is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {} // ping/pong handled by axum
            }
        }
    });

    // The attach call is the connection's lifetime: it resolves when the
    // client disconnects, the session dies, or a newer client supersedes us.
    session.relay().attach(outbound_tx, inbound_rx).await;
    debug!("client websocket for {} detached", key);

    send_task.abort();
    recv_task.abort();
}
