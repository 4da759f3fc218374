//! `labrig-devices` – controllers that own the rig's hardware state.
//!
//! Each controller is constructed once from a driver (or the error that
//! prevented attaching one) and is shared behind an `Arc`. Blocking driver
//! calls run on tokio's blocking pool; sleeps are tokio timers.
//!
//! | Controller | Hardware | Concurrency |
//! |---|---|---|
//! | [`ArmController`] | six bus servos | writes serialized by an async lock |
//! | [`RigController`] | base + valve PWM channels, stirrer GPIO | synchronous writes, guarded stirrer runs |
//! | [`CameraController`] | thermal array or webcam | independent capture loop, [`FrameSlot`] fan-out |

pub mod arm;
pub mod camera;
pub mod font;
pub mod frame;
pub mod rig;
pub mod thermal;
pub mod webcam;

pub use arm::{ArmController, ArmSnapshot, Limits, MoveDefaults, ServoMove, ServoSnapshot};
pub use camera::{
    CameraController, CameraKind, CameraStatus, CaptureError, Captured, FrameListener,
    FrameSource, PauseGuard,
};
pub use frame::{FPS_ALPHA, Frame, FrameSlot, TempRange, smooth};
pub use rig::{RigController, RigHardware, RigSnapshot, StirrerGuard};
pub use thermal::ThermalPipeline;
pub use webcam::WebcamPipeline;

/// Wall-clock milliseconds since the Unix epoch, as reported to clients.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
