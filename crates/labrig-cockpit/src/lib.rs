//! `labrig-cockpit` – the rig's network surface.
//!
//! Two listeners share the same controllers:
//!
//! 1. **Command channel** ([`CommandServer`]): JSON messages over WebSocket.
//!    Each inbound `{type, ...}` is parsed by [`protocol`], executed by the
//!    [`Dispatcher`], and answered with exactly one `ack` or `error`. State
//!    changes are fanned out to every client through the [`Hub`], which
//!    evicts a client on its first failed send.
//!
//! 2. **Media** ([`media`]): MJPEG streams and JSON status for the thermal
//!    camera and the webcam.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use labrig_cockpit::{CommandServer, Dispatcher, Hub, StateView};
//! use labrig_runtime::Sequencer;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn serve(view: StateView, sequencer: Arc<Sequencer>, hub: Arc<Hub>) {
//!     let dispatcher = Arc::new(Dispatcher::new(view, sequencer, hub));
//!     let _ = CommandServer::new(dispatcher)
//!         .run(CancellationToken::new())
//!         .await;
//! }
//! ```

pub mod dispatcher;
pub mod hub;
pub mod media;
pub mod protocol;
pub mod server;
pub mod state;

pub use dispatcher::Dispatcher;
pub use hub::{Client, Hub, MessageSink};
pub use media::{MediaError, MediaState, serve_media};
pub use protocol::{Command, ProtocolError, parse_command};
pub use server::{CommandServer, DEFAULT_PORT, ServerError};
pub use state::{CameraMessage, DiagnosticMessage, StateMessage, StateView, VolumeMessage};
