//! Outbound message shapes: the full state snapshot and per-topic updates.

use std::sync::Arc;

use labrig_devices::{
    ArmController, ArmSnapshot, CameraController, CameraKind, CameraStatus, Limits, MoveDefaults,
    RigController, RigSnapshot, ServoSnapshot,
};
use labrig_runtime::{DiagnosticStatus, VolumeEstimator, VolumeReading};
use serde::Serialize;

/// `{type:"state", ...}` sent on connect, on `get_state`, and after every
/// state change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub xarm: ArmSnapshot,
    pub rig: RigSnapshot,
    pub thermal: CameraStatus,
    pub webcam: CameraStatus,
    pub volume: VolumeReading,
    // Flat copies for dashboards that predate the per-subsystem sections.
    pub servos: Vec<ServoSnapshot>,
    pub limits: Limits<f64>,
    pub defaults: MoveDefaults,
    pub online_ids: Vec<u8>,
    pub angles: Vec<f64>,
}

/// `{type:"thermal"|"webcam", subsystem, ...status}`.
#[derive(Debug, Clone, Serialize)]
pub struct CameraMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub subsystem: &'static str,
    #[serde(flatten)]
    pub status: CameraStatus,
}

impl CameraMessage {
    pub fn new(kind: CameraKind, status: CameraStatus) -> Self {
        Self {
            kind: kind.as_str(),
            subsystem: kind.as_str(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub subsystem: &'static str,
    #[serde(flatten)]
    pub reading: VolumeReading,
}

impl From<VolumeReading> for VolumeMessage {
    fn from(reading: VolumeReading) -> Self {
        Self {
            kind: "volume",
            subsystem: "volume",
            reading,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub subsystem: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_to_valve_delay_s: Option<f64>,
}

impl From<&DiagnosticStatus> for DiagnosticMessage {
    fn from(status: &DiagnosticStatus) -> Self {
        let base_to_valve_delay_s = match status {
            DiagnosticStatus::Initialized {
                base_to_valve_delay_s,
            } => Some(*base_to_valve_delay_s),
            DiagnosticStatus::Completed => None,
        };
        Self {
            kind: "diagnostic",
            subsystem: "rig",
            status: status.as_str(),
            base_to_valve_delay_s,
        }
    }
}

/// Read-only handles on every controller, for building snapshots.
#[derive(Clone)]
pub struct StateView {
    pub arm: Arc<ArmController>,
    pub rig: Arc<RigController>,
    pub thermal: Arc<CameraController>,
    pub webcam: Arc<CameraController>,
    pub volume: Arc<VolumeEstimator>,
}

impl StateView {
    pub fn camera(&self, kind: CameraKind) -> &Arc<CameraController> {
        match kind {
            CameraKind::Thermal => &self.thermal,
            CameraKind::Webcam => &self.webcam,
        }
    }

    pub fn snapshot(&self) -> StateMessage {
        let xarm = self.arm.snapshot();
        let rig = self.rig.snapshot();
        StateMessage {
            kind: "state",
            servos: xarm.servos.clone(),
            limits: xarm.limits.clone(),
            defaults: xarm.defaults.clone(),
            online_ids: xarm.online_ids.clone(),
            angles: rig.channels.clone(),
            xarm,
            rig,
            thermal: self.thermal.status(),
            webcam: self.webcam.status(),
            volume: self.volume.reading(),
        }
    }
}

/// Every controller constructed without hardware.
#[cfg(test)]
pub(crate) fn offline_view() -> StateView {
    use labrig_hal::HalError;
    use labrig_runtime::NullNotifier;
    use labrig_types::{ArmConfig, RigConfig, ThermalConfig, VolumeConfig, WebcamConfig};

    let webcam = Arc::new(CameraController::webcam(
        &WebcamConfig::default(),
        8081,
        Err(HalError::NotAttached("none".into())),
    ));
    StateView {
        arm: Arc::new(ArmController::new(ArmConfig::default(), Err(HalError::NotAttached("none".into())))),
        rig: Arc::new(RigController::new(RigConfig::default(), Err(HalError::NotAttached("none".into())))),
        thermal: Arc::new(CameraController::thermal(
            &ThermalConfig::default(),
            8081,
            Err(HalError::NotAttached("none".into())),
        )),
        volume: Arc::new(VolumeEstimator::new(
            &VolumeConfig::default(),
            None,
            webcam.clone(),
            Arc::new(NullNotifier),
        )),
        webcam,
    }
}
