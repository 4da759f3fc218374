//! [`Hub`] – the set of connected command-channel clients.
//!
//! Every client owns one outbound sink behind its own async lock, so a
//! reply and a broadcast never interleave on the same connection. A
//! broadcast sends to every client at once; any client whose send fails or
//! outlasts the send timeout is evicted and the rest still receive the
//! message.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::SinkExt;
use futures_util::future::join_all;
use futures_util::stream::SplitSink;
use labrig_devices::{CameraKind, CameraStatus, FrameListener};
use labrig_runtime::{DiagnosticStatus, RigNotifier, StatusReporter, VolumeReading};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state::{CameraMessage, DiagnosticMessage, StateView, VolumeMessage};

/// How long one outbound message may take before the client is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound half of a client transport.
#[async_trait]
pub trait MessageSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), String>;
}

#[async_trait]
impl MessageSink for SplitSink<WebSocketStream<TcpStream>, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), String> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| e.to_string())
    }
}

/// One connected client.
pub struct Client {
    id: Uuid,
    sink: tokio::sync::Mutex<Box<dyn MessageSink>>,
    send_timeout: Duration,
}

impl Client {
    pub fn new(sink: Box<dyn MessageSink>) -> Self {
        Self::with_send_timeout(sink, SEND_TIMEOUT)
    }

    pub fn with_send_timeout(sink: Box<dyn MessageSink>, send_timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            sink: tokio::sync::Mutex::new(sink),
            send_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns `false` if the transport rejected the message or did not
    /// take it within the send timeout. Waiting for the sink lock counts
    /// against the timeout.
    pub async fn send_text(&self, text: String) -> bool {
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send_text(text).await
        };
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(client = %self.id, error = %e, "send failed");
                false
            }
            Err(_) => {
                warn!(
                    client = %self.id,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "send timed out"
                );
                false
            }
        }
    }

    pub async fn send_json<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text).await,
            Err(e) => {
                error!(error = %e, "failed to serialise outbound message");
                false
            }
        }
    }

    pub async fn send_error(&self, reason: &str) -> bool {
        self.send_json(&serde_json::json!({ "type": "error", "error": reason }))
            .await
    }
}

#[async_trait]
impl StatusReporter for Client {
    async fn diagnostic(&self, status: DiagnosticStatus) {
        self.send_json(&DiagnosticMessage::from(&status)).await;
    }
}

pub struct Hub {
    clients: RwLock<Vec<Arc<Client>>>,
    state: OnceLock<StateView>,
    send_timeout: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            state: OnceLock::new(),
            send_timeout: SEND_TIMEOUT,
        }
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-client bound on each outbound message.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Attach the controllers whose state is broadcast. Only the first call
    /// has any effect.
    pub fn bind_state(&self, view: StateView) {
        if self.state.set(view).is_err() {
            debug!("hub state already bound");
        }
    }

    pub fn state(&self) -> Option<&StateView> {
        self.state.get()
    }

    pub fn register(&self, sink: Box<dyn MessageSink>) -> Arc<Client> {
        let client = Arc::new(Client::with_send_timeout(sink, self.send_timeout));
        let count = {
            let mut clients = self.clients.write();
            clients.push(client.clone());
            clients.len()
        };
        info!(client = %client.id(), clients = count, "client connected");
        client
    }

    pub fn remove(&self, id: Uuid) {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|c| c.id() != id);
        if clients.len() < before {
            info!(client = %id, clients = clients.len(), "client disconnected");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Send `message` to every client, evicting those whose send fails.
    pub async fn broadcast<T: Serialize>(&self, message: &T) {
        let recipients: Vec<Arc<Client>> = self.clients.read().clone();
        if recipients.is_empty() {
            return;
        }
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to serialise broadcast");
                return;
            }
        };

        let sends = recipients.iter().map(|client| {
            let text = text.clone();
            async move { (client.id(), client.send_text(text).await) }
        });
        let stale: Vec<Uuid> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(id, delivered)| (!delivered).then_some(id))
            .collect();
        if !stale.is_empty() {
            let mut clients = self.clients.write();
            clients.retain(|c| !stale.contains(&c.id()));
            info!(evicted = stale.len(), clients = clients.len(), "dropped unreachable clients");
        }
    }

    pub async fn broadcast_state(&self) {
        if let Some(view) = self.state.get() {
            self.broadcast(&view.snapshot()).await;
        }
    }
}

#[async_trait]
impl RigNotifier for Hub {
    async fn state_changed(&self) {
        self.broadcast_state().await;
    }

    async fn volume_updated(&self, reading: VolumeReading) {
        self.broadcast(&VolumeMessage::from(reading)).await;
    }

    fn has_listeners(&self) -> bool {
        self.client_count() > 0
    }
}

#[async_trait]
impl FrameListener for Hub {
    async fn frame_published(&self, kind: CameraKind, status: CameraStatus) {
        self.broadcast(&CameraMessage::new(kind, status)).await;
    }
}
