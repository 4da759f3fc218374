//! Shared vocabulary for the lab rig control stack.
//!
//! | Item | Purpose |
//! |---|---|
//! | [`RigError`] | Error taxonomy; `Display` is the reason string sent to clients |
//! | [`Device`] | The four hardware subsystems |
//! | [`Availability`] | Attach result discovered once per controller |
//! | [`config`] | Per-subsystem configuration with serde defaults |

pub mod config;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{
    ArmConfig, AutomationConfig, LoopTiming, RigConfig, ThermalConfig, VolumeConfig,
    WebcamConfig,
};

/// A hardware subsystem owned by exactly one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// The six-servo arm on the shared serial bus.
    #[serde(rename = "xarm")]
    Arm,
    /// Base rotation, valves and stirrer.
    Rig,
    Thermal,
    Webcam,
}

impl Device {
    /// Wire name used as the `subsystem` field and error prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Arm => "xarm",
            Device::Rig => "rig",
            Device::Thermal => "thermal",
            Device::Webcam => "webcam",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy spanning validation, arbitration and hardware faults.
///
/// The `Display` output of every variant is exactly the reason string a
/// client receives in `{"type":"error","error":...}`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RigError {
    /// The device never attached; permanent until restart.
    #[error("{device}_unavailable:{reason}")]
    HardwareUnavailable { device: Device, reason: String },

    /// A command argument failed validation. Carries the wire code.
    #[error("{0}")]
    InvalidArgument(&'static str),

    #[error("invalid_id")]
    InvalidServoId(i64),

    /// Another dispense or cleanup holds the automation mutex.
    #[error("automation_busy")]
    Busy,

    #[error("cleanup_step_invalid")]
    CleanupStepInvalid { step: usize },

    #[error("{component}_fault:{details}")]
    HardwareFault { component: String, details: String },

    /// The task was superseded on its axis. Internal only.
    #[error("cancelled_by_preemption")]
    Cancelled,
}

impl RigError {
    pub fn unavailable(device: Device, reason: impl Into<String>) -> Self {
        RigError::HardwareUnavailable {
            device,
            reason: reason.into(),
        }
    }

    pub fn fault(component: impl Into<String>, details: impl fmt::Display) -> Self {
        RigError::HardwareFault {
            component: component.into(),
            details: details.to_string(),
        }
    }

    /// Caller-facing errors are reported verbatim; everything else gets an
    /// `<action>_failed:` prefix at the dispatcher boundary.
    pub fn is_verbatim(&self) -> bool {
        matches!(
            self,
            RigError::HardwareUnavailable { .. }
                | RigError::InvalidArgument(_)
                | RigError::InvalidServoId(_)
                | RigError::Busy
        )
    }
}

/// Result of probing a device at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub error: Option<String>,
}

impl Availability {
    pub fn online() -> Self {
        Self {
            available: true,
            error: None,
        }
    }

    pub fn offline(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            error: Some(reason.into()),
        }
    }

    /// Fail with [`RigError::HardwareUnavailable`] unless attached.
    pub fn ensure(&self, device: Device) -> Result<(), RigError> {
        if self.available {
            return Ok(());
        }
        Err(RigError::unavailable(
            device,
            self.error.as_deref().unwrap_or("unknown"),
        ))
    }
}
