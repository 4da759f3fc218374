//! `labrig-runtime` – automation on top of the device controllers.
//!
//! # Modules
//!
//! - [`sequencer`] – [`Sequencer`][sequencer::Sequencer]: dispense, cleanup,
//!   diagnostic and stir procedures with per-axis preemption and the shared
//!   automation lock.
//! - [`slot`] – [`PreemptibleSlot`][slot::PreemptibleSlot]: one cancellable
//!   task per control axis; a new task replaces the old one and starts only
//!   after the old one's cleanup.
//! - [`notify`] – [`RigNotifier`][notify::RigNotifier] and
//!   [`StatusReporter`][notify::StatusReporter]: how automation reaches
//!   connected clients without depending on the transport.
//! - [`volume`] – [`VolumeEstimator`][volume::VolumeEstimator]: window-gated
//!   background loop turning webcam frames into a flask volume.
//! - [`vision`] – [`AnthropicVision`][vision::AnthropicVision]: the
//!   Messages API client behind the estimator.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing].

pub mod notify;
pub mod sequencer;
pub mod slot;
pub mod telemetry;
pub mod vision;
pub mod volume;

pub use notify::{DiagnosticStatus, NullNotifier, RigNotifier, StatusReporter};
pub use sequencer::{BASE_MOVE_PAUSE, CleanupReport, DispenseReport, Sequencer};
pub use slot::{Preempted, PreemptibleSlot, cancellable, sleep_or_cancel};
pub use telemetry::init_tracing;
pub use vision::{AnthropicVision, VisionError, VolumeModel};
pub use volume::{VolumeEstimator, VolumeReading, parse_volume_from_text};
