//! Outbound notification seams between automation and the client hub.

use async_trait::async_trait;

use crate::volume::VolumeReading;

/// Fan-out of state changes to every connected client.
#[async_trait]
pub trait RigNotifier: Send + Sync {
    /// Something in the arm or rig state changed; rebroadcast the snapshot.
    async fn state_changed(&self);

    async fn volume_updated(&self, reading: VolumeReading);

    /// Whether anyone is listening at all.
    fn has_listeners(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticStatus {
    Initialized { base_to_valve_delay_s: f64 },
    Completed,
}

impl DiagnosticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticStatus::Initialized { .. } => "initialized",
            DiagnosticStatus::Completed => "completed",
        }
    }
}

/// Progress sink for the client that started a diagnostic run.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn diagnostic(&self, status: DiagnosticStatus);
}

/// Discards everything. Used before the hub exists and in tests.
pub struct NullNotifier;

#[async_trait]
impl RigNotifier for NullNotifier {
    async fn state_changed(&self) {}

    async fn volume_updated(&self, _reading: VolumeReading) {}

    fn has_listeners(&self) -> bool {
        false
    }
}

#[async_trait]
impl StatusReporter for NullNotifier {
    async fn diagnostic(&self, _status: DiagnosticStatus) {}
}
