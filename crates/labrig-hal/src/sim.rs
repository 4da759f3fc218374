//! In-process simulated drivers for headless runs and CI.
//!
//! Each driver is a cheap `Clone` handle over shared state: hand one clone to
//! a controller (boxed as the driver trait) and keep another to inspect
//! what was written or to inject faults.
//!
//! # Example
//!
//! ```rust
//! use labrig_hal::sim::SimHardware;
//! use labrig_hal::ServoBus;
//! use labrig_types::{ArmConfig, ThermalConfig, WebcamConfig};
//!
//! let hw = SimHardware::from_config(
//!     &ArmConfig::default(),
//!     &ThermalConfig::default(),
//!     &WebcamConfig::default(),
//! );
//! let mut bus = hw.servo_bus.clone();
//! bus.write_position(1, 700, 500, false).unwrap();
//! assert_eq!(hw.servo_bus.position(1), Some(700));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use labrig_types::{ArmConfig, ThermalConfig, WebcamConfig};
use parking_lot::Mutex;

use crate::HalError;
use crate::actuator::PwmChannel;
use crate::camera::{CameraFrame, ThermalSensor, VideoDevice};
use crate::relay::StirrerLine;
use crate::servo_bus::{ServoBus, ServoReply};

// ────────────────────────────────────────────────────────────────────────────
// Servo bus
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimServoWrite {
    pub id: u8,
    pub raw: i32,
    pub duration_ms: u32,
}

#[derive(Debug, Default)]
pub struct SimServoState {
    pub positions: HashMap<u8, i32>,
    /// Servos that answer reads; the rest time out.
    pub responsive: HashSet<u8>,
    /// Upcoming reads answered with an unparsable frame.
    pub garbled_reads: u32,
    pub fail_writes: bool,
    pub writes: Vec<SimServoWrite>,
    pub reads: u32,
}

/// A servo bus where every write lands instantly.
#[derive(Clone, Default)]
pub struct SimServoBus {
    state: Arc<Mutex<SimServoState>>,
}

impl SimServoBus {
    /// All `ids` respond and report `raw`.
    pub fn new(ids: &[u8], raw: i32) -> Self {
        let bus = Self::default();
        bus.with_state(|s| {
            for &id in ids {
                s.positions.insert(id, raw);
                s.responsive.insert(id);
            }
        });
        bus
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut SimServoState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn position(&self, id: u8) -> Option<i32> {
        self.state.lock().positions.get(&id).copied()
    }

    pub fn writes(&self) -> Vec<SimServoWrite> {
        self.state.lock().writes.clone()
    }
}

impl ServoBus for SimServoBus {
    fn read_position(&mut self, id: u8) -> Result<ServoReply, HalError> {
        let mut s = self.state.lock();
        s.reads += 1;
        if s.garbled_reads > 0 {
            s.garbled_reads -= 1;
            return Ok(ServoReply::Garbled("checksum mismatch".to_string()));
        }
        if !s.responsive.contains(&id) {
            return Err(HalError::Timeout);
        }
        let position = s.positions.get(&id).copied().unwrap_or_default();
        Ok(ServoReply::Position(i64::from(position)))
    }

    fn write_position(
        &mut self,
        id: u8,
        raw: i32,
        duration_ms: u32,
        _wait: bool,
    ) -> Result<(), HalError> {
        let mut s = self.state.lock();
        if s.fail_writes {
            return Err(HalError::Io("bus write rejected".to_string()));
        }
        s.positions.insert(id, raw);
        s.writes.push(SimServoWrite {
            id,
            raw,
            duration_ms,
        });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PWM board
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimPwmState {
    angles: HashMap<usize, f64>,
    writes: Vec<(usize, f64)>,
    failing: bool,
}

/// A PWM driver board whose outputs remember their last angle.
#[derive(Clone, Default)]
pub struct SimPwmBoard {
    state: Arc<Mutex<SimPwmState>>,
}

impl SimPwmBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel: usize) -> SimPwmChannel {
        SimPwmChannel {
            board: self.clone(),
            channel,
        }
    }

    /// Pre-set an output as if it had been driven before start-up.
    pub fn preset(&self, channel: usize, angle_deg: f64) {
        self.state.lock().angles.insert(channel, angle_deg);
    }

    pub fn angle(&self, channel: usize) -> Option<f64> {
        self.state.lock().angles.get(&channel).copied()
    }

    pub fn writes(&self) -> Vec<(usize, f64)> {
        self.state.lock().writes.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

pub struct SimPwmChannel {
    board: SimPwmBoard,
    channel: usize,
}

impl PwmChannel for SimPwmChannel {
    fn channel(&self) -> usize {
        self.channel
    }

    fn set_angle(&mut self, angle_deg: f64) -> Result<(), HalError> {
        let mut s = self.board.state.lock();
        if s.failing {
            return Err(HalError::Io("i2c nack".to_string()));
        }
        s.angles.insert(self.channel, angle_deg);
        s.writes.push((self.channel, angle_deg));
        Ok(())
    }

    fn angle(&self) -> Option<f64> {
        self.board.angle(self.channel)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stirrer line
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimLineState {
    high: bool,
    transitions: Vec<bool>,
    failing: bool,
}

#[derive(Clone, Default)]
pub struct SimStirrerLine {
    state: Arc<Mutex<SimLineState>>,
}

impl SimStirrerLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.state.lock().high
    }

    /// Every level written, in order.
    pub fn transitions(&self) -> Vec<bool> {
        self.state.lock().transitions.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

impl StirrerLine for SimStirrerLine {
    fn set_level(&mut self, high: bool) -> Result<(), HalError> {
        let mut s = self.state.lock();
        if s.failing {
            return Err(HalError::Io("gpio busy".to_string()));
        }
        s.high = high;
        s.transitions.push(high);
        Ok(())
    }

    fn level(&self) -> bool {
        self.is_high()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Thermal sensor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimThermalState {
    pending_errors: VecDeque<HalError>,
    frames: u32,
}

/// A thermopile that sees a warm flask drifting across a room-temperature
/// bench.
#[derive(Clone)]
pub struct SimThermalSensor {
    width: u32,
    height: u32,
    state: Arc<Mutex<SimThermalState>>,
}

impl SimThermalSensor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: Arc::default(),
        }
    }

    /// Queue errors returned by the next reads, one per read.
    pub fn push_errors(&self, errors: impl IntoIterator<Item = HalError>) {
        self.state.lock().pending_errors.extend(errors);
    }

    pub fn frames_read(&self) -> u32 {
        self.state.lock().frames
    }
}

impl ThermalSensor for SimThermalSensor {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self, out: &mut [f32]) -> Result<(), HalError> {
        let mut s = self.state.lock();
        if let Some(err) = s.pending_errors.pop_front() {
            return Err(err);
        }
        s.frames += 1;
        let hot_x = (s.frames % self.width.max(1)) as f32;
        let hot_y = self.height as f32 / 2.0;
        for (i, cell) in out.iter_mut().enumerate() {
            let x = (i as u32 % self.width.max(1)) as f32;
            let y = (i as u32 / self.width.max(1)) as f32;
            let d2 = (x - hot_x).powi(2) + (y - hot_y).powi(2);
            *cell = 21.5 + 0.05 * y + 18.0 * (-d2 / 12.0).exp();
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Video device
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimVideoState {
    pub open: bool,
    pub fail_open: bool,
    /// Upcoming reads that fail.
    pub failed_reads: u32,
    pub opens: u32,
    pub frames: u64,
}

/// A webcam producing a colour-bar test card with a moving marker.
#[derive(Clone)]
pub struct SimVideoDevice {
    index: u32,
    width: u32,
    height: u32,
    state: Arc<Mutex<SimVideoState>>,
}

impl SimVideoDevice {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            state: Arc::default(),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut SimVideoState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

impl VideoDevice for SimVideoDevice {
    fn path(&self) -> String {
        format!("/dev/video{}", self.index)
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn open(&mut self) -> Result<(), HalError> {
        let mut s = self.state.lock();
        if s.fail_open {
            return Err(HalError::NotAttached(self.path()));
        }
        s.open = true;
        s.opens += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<CameraFrame, HalError> {
        let mut s = self.state.lock();
        if !s.open {
            return Err(HalError::Io("device not open".to_string()));
        }
        if s.failed_reads > 0 {
            s.failed_reads -= 1;
            return Err(HalError::Io("VIDIOC_DQBUF failed".to_string()));
        }
        s.frames += 1;

        const BARS: [[u8; 3]; 6] = [
            [235, 235, 235],
            [235, 235, 16],
            [16, 235, 235],
            [16, 235, 16],
            [235, 16, 235],
            [16, 16, 235],
        ];
        let marker = (s.frames % u64::from(self.width.max(1))) as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for _y in 0..self.height {
            for x in 0..self.width {
                let px = if x == marker {
                    [0, 0, 0]
                } else {
                    BARS[(x * BARS.len() as u32 / self.width.max(1)) as usize]
                };
                data.extend_from_slice(&px);
            }
        }
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn release(&mut self) {
        self.state.lock().open = false;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Full simulated rig
// ────────────────────────────────────────────────────────────────────────────

/// One simulated driver per subsystem, sized from configuration.
#[derive(Clone)]
pub struct SimHardware {
    pub servo_bus: SimServoBus,
    pub pwm: SimPwmBoard,
    pub stirrer: SimStirrerLine,
    pub thermal: SimThermalSensor,
    pub webcam: SimVideoDevice,
}

impl SimHardware {
    pub fn from_config(arm: &ArmConfig, thermal: &ThermalConfig, webcam: &WebcamConfig) -> Self {
        let mid = arm.raw_min + (arm.raw_max - arm.raw_min) / 2;
        Self {
            servo_bus: SimServoBus::new(&arm.servo_ids, mid),
            pwm: SimPwmBoard::new(),
            stirrer: SimStirrerLine::new(),
            thermal: SimThermalSensor::new(thermal.width, thermal.height),
            webcam: SimVideoDevice::new(webcam.device_index, webcam.width, webcam.height),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
