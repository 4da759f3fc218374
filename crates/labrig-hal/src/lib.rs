//! `labrig-hal` – hardware abstraction for the lab rig.
//!
//! Every driver trait here is **blocking**: implementations talk to a serial
//! bus, I2C, GPIO or a V4L2 device and may stall for tens of milliseconds.
//! Controllers in `labrig-devices` move those calls onto the blocking worker
//! pool; nothing in this crate is async.
//!
//! | Module | Contents |
//! |---|---|
//! | [`units`] | [`ServoScale`] angle ↔ raw conversion |
//! | [`servo_bus`] | [`ServoBus`] and position-reply parsing |
//! | [`actuator`] | [`PwmChannel`] for base and valve servos |
//! | [`relay`] | [`StirrerLine`] GPIO output |
//! | [`camera`] | [`ThermalSensor`], [`VideoDevice`], [`CameraFrame`] |
//! | [`sim`] | In-process drivers for headless runs and tests |

pub mod actuator;
pub mod camera;
pub mod relay;
pub mod servo_bus;
pub mod sim;
pub mod units;

use labrig_types::{Device, RigError};
use thiserror::Error;

pub use actuator::PwmChannel;
pub use camera::{CameraFrame, ThermalSensor, VideoDevice};
pub use relay::StirrerLine;
pub use servo_bus::{ServoBus, ServoReply, parse_position_reply};
pub use units::ServoScale;

/// Failures reported by a blocking driver call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalError {
    #[error("not attached: {0}")]
    NotAttached(String),

    /// No physical backend was built into this binary.
    #[error("driver_not_configured")]
    NotConfigured,

    #[error("io error: {0}")]
    Io(String),

    #[error("timeout")]
    Timeout,

    /// A read produced a corrupt or partial value; retrying may succeed.
    #[error("transient read error: {0}")]
    Transient(String),

    /// The driver gave up after its own internal retries.
    #[error("too many retries")]
    TooManyRetries,
}

impl HalError {
    /// Whether a caller-side retry is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HalError::Transient(_) | HalError::TooManyRetries)
    }

    /// Lift into the domain taxonomy, attributing the fault to `device`.
    pub fn into_rig(self, device: Device) -> RigError {
        RigError::fault(device.as_str(), self)
    }
}
