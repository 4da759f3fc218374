//! [`CommandServer`] – WebSocket listener for the JSON command channel.
//!
//! Listens on `0.0.0.0:8765` unless overridden. Each accepted socket is
//! upgraded, registered with the [`Hub`](crate::hub::Hub), greeted, and then
//! read until it closes. Inbound messages are handled in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;

/// Default TCP port for the command channel.
pub const DEFAULT_PORT: u16 = 8765;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("websocket handshake from {peer}: {reason}")]
    Handshake { peer: SocketAddr, reason: String },
}

pub struct CommandServer {
    dispatcher: Arc<Dispatcher>,
    host: String,
    port: u16,
}

impl CommandServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.host, self.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Bind and accept connections until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "command channel listening");
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, dispatcher, shutdown).await {
                                warn!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                },
            }
        }
        info!("command channel stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Handshake {
            peer,
            reason: e.to_string(),
        })?;
    let (ws_tx, mut ws_rx) = ws_stream.split();

    let client = dispatcher.hub().register(Box::new(ws_tx));
    debug!(%peer, client = %client.id(), "websocket open");
    dispatcher.greet(&client).await;

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => dispatcher.handle_text(&client, text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(%peer, error = %e, "websocket read error");
                break;
            }
            _ => {}
        }
    }

    dispatcher.hub().remove(client.id());
    Ok(())
}
