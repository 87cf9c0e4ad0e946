// ABOUTME: Per-session message relay between the REPL backend and whichever client is currently attached
// Buffers backend output while no client is connected so nothing is lost across reattaches

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One message crossing the relay, in either direction.
///
/// The relay is transport-agnostic: the websocket layers on both sides
/// convert their frame types to and from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// The client currently bound to a session, if any.
#[derive(Clone)]
struct AttachedClient {
    tx: mpsc::UnboundedSender<RelayMessage>,
    /// Cancelled when a newer attach supersedes this one.
    kicked: CancellationToken,
}

/// Condition-variable-guarded optional client endpoint.
///
/// Clients come and go independently of the session; the consumer task waits
/// on `notify` whenever the slot is empty.
#[derive(Default)]
struct ClientSlot {
    current: Mutex<Option<AttachedClient>>,
    notify: Notify,
}

/// Duplex pipe between one backend and at most one attached client.
///
/// Backend output flows through an unbounded FIFO queue drained by a
/// background consumer task; the queue is deliberately unbounded so a slow or
/// absent client can never stall the backend. Client input is written through
/// to the backend by whichever [`Relay::attach`] call is currently live.
pub struct Relay {
    pending_tx: mpsc::UnboundedSender<RelayMessage>,
    backend_tx: mpsc::UnboundedSender<RelayMessage>,
    slot: Arc<ClientSlot>,
    cancel: CancellationToken,
    consumer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    /// Build a relay that forwards client input into `backend_tx`.
    ///
    /// Spawns the consumer task immediately; backend output is accepted via
    /// [`Relay::ingest`] from the moment this returns.
    pub fn new(backend_tx: mpsc::UnboundedSender<RelayMessage>) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let slot = Arc::new(ClientSlot::default());
        let consumer = tokio::spawn(drain_pending(pending_rx, Arc::clone(&slot)));

        Self {
            pending_tx,
            backend_tx,
            slot,
            cancel: CancellationToken::new(),
            consumer: std::sync::Mutex::new(Some(consumer)),
        }
    }

    /// Queue one backend message for delivery to the attached client.
    ///
    /// Returns false once the relay has shut down.
    pub fn ingest(&self, msg: RelayMessage) -> bool {
        self.pending_tx.send(msg).is_ok()
    }

    /// Bind a client to this session and relay its input to the backend.
    ///
    /// The call itself is the inbound half of the relay: it resolves only
    /// when the client channel closes, the backend goes away, the session is
    /// destroyed, or a newer attach replaces this one. An existing attachment
    /// is superseded, not rejected; the superseded client is force-closed.
    pub async fn attach(
        &self,
        outbound: mpsc::UnboundedSender<RelayMessage>,
        mut inbound: mpsc::UnboundedReceiver<RelayMessage>,
    ) {
        let kicked = CancellationToken::new();
        {
            let mut guard = self.slot.current.lock().await;
            if let Some(previous) = guard.replace(AttachedClient {
                tx: outbound.clone(),
                kicked: kicked.clone(),
            }) {
                debug!("new client attached, superseding the previous one");
                previous.kicked.cancel();
            }
            self.slot.notify.notify_one();
        }

        loop {
            tokio::select! {
                _ = kicked.cancelled() => break,
                _ = self.cancel.cancelled() => break,
                received = inbound.recv() => match received {
                    Some(msg) => {
                        if self.backend_tx.send(msg).is_err() {
                            // backend channel closed underneath us
                            break;
                        }
                    }
                    None => break, // client disconnected
                },
            }
        }

        // Only clear the slot if it still holds this attach's channel; a
        // replacement may already have moved in.
        let mut guard = self.slot.current.lock().await;
        if guard
            .as_ref()
            .is_some_and(|client| client.tx.same_channel(&outbound))
        {
            *guard = None;
        }
    }

    /// Stop the consumer task and release any in-flight attach calls.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Ok(mut guard) = self.consumer.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Consumer task: oldest pending message first, delivered to the attached
/// client, waiting while no client is present.
async fn drain_pending(
    mut pending_rx: mpsc::UnboundedReceiver<RelayMessage>,
    slot: Arc<ClientSlot>,
) {
    while let Some(msg) = pending_rx.recv().await {
        let mut undelivered = Some(msg);
        loop {
            let notified = slot.notify.notified();
            {
                let mut guard = slot.current.lock().await;
                if let Some(client) = guard.as_ref() {
                    if let Some(msg) = undelivered.take() {
                        if client.tx.send(msg).is_err() {
                            // The client vanished between attach and now;
                            // drop the message and free the slot. Delivery is
                            // at-most-once per attached client.
                            debug!("client channel closed, dropping one message");
                            *guard = None;
                        }
                    }
                    break;
                }
            }
            // Guard is released before suspending; attach() will notify.
            notified.await;
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}
