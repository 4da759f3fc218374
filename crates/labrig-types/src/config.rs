//! Per-subsystem configuration.
//!
//! Every field carries a serde default so a partial `config.toml` (or none at
//! all) yields a working rig description. Durations are stored as fractional
//! seconds (`*_s`) for readability in TOML and exposed as [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

// ─── Arm ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmConfig {
    #[serde(default = "default_servo_ids")]
    pub servo_ids: Vec<u8>,
    #[serde(default = "default_min_angle")]
    pub min_angle_deg: f64,
    #[serde(default = "default_max_angle")]
    pub max_angle_deg: f64,
    #[serde(default = "default_raw_min")]
    pub raw_min: i32,
    #[serde(default = "default_raw_max")]
    pub raw_max: i32,
    #[serde(default = "default_move_ms")]
    pub default_move_ms: u32,
    #[serde(default = "default_min_move_ms")]
    pub min_move_ms: u32,
    #[serde(default = "default_max_move_ms")]
    pub max_move_ms: u32,
    /// Attempts per position read before the servo is reported unknown.
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    #[serde(default = "default_read_retry_delay")]
    pub read_retry_delay_s: f64,
}

fn default_servo_ids() -> Vec<u8> {
    vec![1, 2, 3, 4, 5, 6]
}
fn default_min_angle() -> f64 {
    0.0
}
fn default_max_angle() -> f64 {
    240.0
}
fn default_raw_min() -> i32 {
    0
}
fn default_raw_max() -> i32 {
    1000
}
fn default_move_ms() -> u32 {
    600
}
fn default_min_move_ms() -> u32 {
    100
}
fn default_max_move_ms() -> u32 {
    5000
}
fn default_read_retries() -> u32 {
    3
}
fn default_read_retry_delay() -> f64 {
    0.05
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            servo_ids: default_servo_ids(),
            min_angle_deg: default_min_angle(),
            max_angle_deg: default_max_angle(),
            raw_min: default_raw_min(),
            raw_max: default_raw_max(),
            default_move_ms: default_move_ms(),
            min_move_ms: default_min_move_ms(),
            max_move_ms: default_max_move_ms(),
            read_retries: default_read_retries(),
            read_retry_delay_s: default_read_retry_delay(),
        }
    }
}

impl ArmConfig {
    pub fn clamp_move_ms(&self, move_ms: i64) -> u32 {
        move_ms.clamp(i64::from(self.min_move_ms), i64::from(self.max_move_ms)) as u32
    }

    pub fn read_retry_delay(&self) -> Duration {
        secs(self.read_retry_delay_s)
    }
}

// ─── Rig ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Number of PWM channels in use, base channel included.
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub base_channel: usize,
    /// Discrete base rotation stops, one per dropper, in dropper order.
    #[serde(default = "default_base_positions")]
    pub base_positions: Vec<f64>,
    #[serde(default)]
    pub closed_angle: f64,
    #[serde(default = "default_open_angle")]
    pub open_angle: f64,
    #[serde(default)]
    pub default_angle: f64,
    /// Valve channel for each dropper, in dropper order.
    #[serde(default = "default_valve_channels")]
    pub valve_channels: Vec<usize>,
    #[serde(default = "default_stirrer_durations")]
    pub stirrer_durations_s: Vec<u32>,
    /// Time the base takes to swing between stops after a write.
    #[serde(default = "default_base_travel")]
    pub base_travel_s: f64,
    #[serde(default = "default_base_to_valve_delay")]
    pub base_to_valve_delay_s: f64,
    #[serde(default = "default_diagnostic_open")]
    pub diagnostic_open_s: f64,
    #[serde(default = "default_diagnostic_post_close")]
    pub diagnostic_post_close_s: f64,
    #[serde(default = "default_diagnostic_stirrer")]
    pub diagnostic_stirrer_s: f64,
    /// Drive every channel to `default_angle` on start instead of reading
    /// the outputs back.
    #[serde(default = "default_true")]
    pub init_servos_on_start: bool,
}

fn default_channels() -> usize {
    4
}
fn default_base_positions() -> Vec<f64> {
    vec![0.0, 120.0, 240.0]
}
fn default_open_angle() -> f64 {
    90.0
}
fn default_valve_channels() -> Vec<usize> {
    vec![1, 2, 3]
}
fn default_stirrer_durations() -> Vec<u32> {
    vec![1, 5, 10]
}
fn default_base_travel() -> f64 {
    0.8
}
fn default_base_to_valve_delay() -> f64 {
    0.5
}
fn default_diagnostic_open() -> f64 {
    1.0
}
fn default_diagnostic_post_close() -> f64 {
    0.5
}
fn default_diagnostic_stirrer() -> f64 {
    5.0
}
fn default_true() -> bool {
    true
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            base_channel: 0,
            base_positions: default_base_positions(),
            closed_angle: 0.0,
            open_angle: default_open_angle(),
            default_angle: 0.0,
            valve_channels: default_valve_channels(),
            stirrer_durations_s: default_stirrer_durations(),
            base_travel_s: default_base_travel(),
            base_to_valve_delay_s: default_base_to_valve_delay(),
            diagnostic_open_s: default_diagnostic_open(),
            diagnostic_post_close_s: default_diagnostic_post_close(),
            diagnostic_stirrer_s: default_diagnostic_stirrer(),
            init_servos_on_start: true,
        }
    }
}

impl RigConfig {
    /// Droppers are numbered from 1 and need both a base stop and a valve.
    pub fn dropper_count(&self) -> usize {
        self.base_positions.len().min(self.valve_channels.len())
    }

    pub fn base_travel(&self) -> Duration {
        secs(self.base_travel_s)
    }

    pub fn diagnostic_open(&self) -> Duration {
        secs(self.diagnostic_open_s)
    }

    pub fn diagnostic_post_close(&self) -> Duration {
        secs(self.diagnostic_post_close_s)
    }

    pub fn diagnostic_stirrer(&self) -> Duration {
        secs(self.diagnostic_stirrer_s)
    }
}

// ─── Cameras ────────────────────────────────────────────────────────────────

/// Capture loop cadence shared by both cameras.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTiming {
    pub capture_interval: Duration,
    pub fallback_interval: Duration,
    pub error_log_interval: Duration,
    pub broadcast_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalConfig {
    #[serde(default = "default_thermal_width")]
    pub width: u32,
    #[serde(default = "default_thermal_height")]
    pub height: u32,
    /// Nearest-neighbour upscale factor applied to the sensor grid.
    #[serde(default = "default_thermal_scale")]
    pub scale: u32,
    #[serde(default = "default_text_band")]
    pub text_band_px: u32,
    #[serde(default = "default_thermal_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_thermal_capture")]
    pub capture_interval_s: f64,
    #[serde(default = "default_thermal_fallback")]
    pub fallback_interval_s: f64,
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    #[serde(default = "default_read_retry_delay")]
    pub read_retry_delay_s: f64,
    #[serde(default = "default_error_log_interval")]
    pub error_log_interval_s: f64,
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_s: f64,
    #[serde(default = "default_thermal_path")]
    pub stream_path: String,
}

fn default_thermal_width() -> u32 {
    32
}
fn default_thermal_height() -> u32 {
    24
}
fn default_thermal_scale() -> u32 {
    20
}
fn default_text_band() -> u32 {
    28
}
fn default_thermal_quality() -> u8 {
    85
}
fn default_thermal_capture() -> f64 {
    0.125
}
fn default_thermal_fallback() -> f64 {
    0.5
}
fn default_error_log_interval() -> f64 {
    10.0
}
fn default_broadcast_interval() -> f64 {
    1.0
}
fn default_thermal_path() -> String {
    "/thermal.mjpeg".to_string()
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            width: default_thermal_width(),
            height: default_thermal_height(),
            scale: default_thermal_scale(),
            text_band_px: default_text_band(),
            jpeg_quality: default_thermal_quality(),
            capture_interval_s: default_thermal_capture(),
            fallback_interval_s: default_thermal_fallback(),
            read_retries: default_read_retries(),
            read_retry_delay_s: default_read_retry_delay(),
            error_log_interval_s: default_error_log_interval(),
            broadcast_interval_s: default_broadcast_interval(),
            stream_path: default_thermal_path(),
        }
    }
}

impl ThermalConfig {
    pub fn timing(&self) -> LoopTiming {
        LoopTiming {
            capture_interval: secs(self.capture_interval_s),
            fallback_interval: secs(self.fallback_interval_s),
            error_log_interval: secs(self.error_log_interval_s),
            broadcast_interval: secs(self.broadcast_interval_s),
        }
    }

    pub fn read_retry_delay(&self) -> Duration {
        secs(self.read_retry_delay_s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebcamConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_webcam_width")]
    pub width: u32,
    #[serde(default = "default_webcam_height")]
    pub height: u32,
    #[serde(default = "default_webcam_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_webcam_capture")]
    pub capture_interval_s: f64,
    #[serde(default = "default_webcam_fallback")]
    pub fallback_interval_s: f64,
    #[serde(default = "default_error_log_interval")]
    pub error_log_interval_s: f64,
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_s: f64,
    #[serde(default = "default_webcam_path")]
    pub stream_path: String,
}

fn default_webcam_width() -> u32 {
    640
}
fn default_webcam_height() -> u32 {
    480
}
fn default_webcam_quality() -> u8 {
    80
}
fn default_webcam_capture() -> f64 {
    0.066
}
fn default_webcam_fallback() -> f64 {
    1.0
}
fn default_webcam_path() -> String {
    "/webcam.mjpeg".to_string()
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_webcam_width(),
            height: default_webcam_height(),
            jpeg_quality: default_webcam_quality(),
            capture_interval_s: default_webcam_capture(),
            fallback_interval_s: default_webcam_fallback(),
            error_log_interval_s: default_error_log_interval(),
            broadcast_interval_s: default_broadcast_interval(),
            stream_path: default_webcam_path(),
        }
    }
}

impl WebcamConfig {
    pub fn timing(&self) -> LoopTiming {
        LoopTiming {
            capture_interval: secs(self.capture_interval_s),
            fallback_interval: secs(self.fallback_interval_s),
            error_log_interval: secs(self.error_log_interval_s),
            broadcast_interval: secs(self.broadcast_interval_s),
        }
    }
}

// ─── Automation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Volume delivered by one valve pulse.
    #[serde(default = "default_ml_per_send")]
    pub ml_per_send: f64,
    #[serde(default = "default_valve_open")]
    pub valve_open_s: f64,
    #[serde(default = "default_between_sends")]
    pub between_sends_s: f64,
    #[serde(default = "default_stir_max")]
    pub stir_max_duration_s: f64,
    /// Full-arm joint angles per cleanup pose, one entry per configured servo.
    #[serde(default = "default_cleanup_sequence")]
    pub cleanup_sequence_deg: Vec<Vec<f64>>,
    /// Dropper whose pulses open the volume-estimation window; `0` disables.
    #[serde(default = "default_volume_dropper")]
    pub volume_dropper: usize,
    #[serde(default = "default_volume_window")]
    pub volume_window_s: f64,
    /// Largest number of valve pulses one dispense may request.
    #[serde(default = "default_max_sends")]
    pub max_sends: u32,
}

fn default_ml_per_send() -> f64 {
    5.0
}
fn default_valve_open() -> f64 {
    0.5
}
fn default_between_sends() -> f64 {
    0.5
}
fn default_stir_max() -> f64 {
    600.0
}
fn default_cleanup_sequence() -> Vec<Vec<f64>> {
    vec![
        vec![120.0, 120.0, 120.0, 120.0, 120.0, 120.0],
        vec![120.0, 90.0, 150.0, 60.0, 120.0, 120.0],
        vec![120.0, 90.0, 150.0, 180.0, 120.0, 120.0],
        vec![120.0, 120.0, 120.0, 120.0, 120.0, 120.0],
    ]
}
fn default_volume_dropper() -> usize {
    3
}
fn default_volume_window() -> f64 {
    10.0
}
fn default_max_sends() -> u32 {
    1000
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            ml_per_send: default_ml_per_send(),
            valve_open_s: default_valve_open(),
            between_sends_s: default_between_sends(),
            stir_max_duration_s: default_stir_max(),
            cleanup_sequence_deg: default_cleanup_sequence(),
            volume_dropper: default_volume_dropper(),
            volume_window_s: default_volume_window(),
            max_sends: default_max_sends(),
        }
    }
}

impl AutomationConfig {
    pub fn valve_open(&self) -> Duration {
        secs(self.valve_open_s)
    }

    pub fn between_sends(&self) -> Duration {
        secs(self.between_sends_s)
    }

    pub fn volume_window(&self) -> Duration {
        secs(self.volume_window_s)
    }

    pub fn is_volume_dropper(&self, dropper: usize) -> bool {
        self.volume_dropper != 0 && self.volume_dropper == dropper
    }
}

// ─── Volume estimation ──────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_vision_url")]
    pub api_url: String,
    /// Read from `ANTHROPIC_API_KEY` when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whole-request bound on one vision call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_s: f64,
}

impl std::fmt::Debug for VolumeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeConfig")
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("poll_interval_s", &self.poll_interval_s)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_s", &self.request_timeout_s)
            .finish()
    }
}

fn default_vision_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_vision_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_poll_interval() -> f64 {
    2.0
}
fn default_max_tokens() -> u32 {
    10
}
fn default_request_timeout() -> f64 {
    30.0
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            model: default_vision_model(),
            api_url: default_vision_url(),
            api_key: String::new(),
            poll_interval_s: default_poll_interval(),
            max_tokens: default_max_tokens(),
            request_timeout_s: default_request_timeout(),
        }
    }
}

impl VolumeConfig {
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_s)
    }

    pub fn request_timeout(&self) -> Duration {
        secs(self.request_timeout_s)
    }
}
