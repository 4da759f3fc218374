//! [`RigController`] – dropper carousel (base), pinch valves and stirrer.
//!
//! Every angle is snapped before it reaches a PWM channel: the base only
//! ever sits at one of its configured stops and a valve is either open or
//! closed. Channel writes are quick I2C transactions and happen inline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use labrig_hal::{HalError, PwmChannel, StirrerLine};
use labrig_types::{Availability, Device, RigConfig, RigError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, warn};

/// Drivers for the rig, indexed by channel number.
pub struct RigHardware {
    pub channels: Vec<Box<dyn PwmChannel>>,
    /// `None` when the GPIO chip could not be claimed; valves still work.
    pub stirrer: Option<Box<dyn StirrerLine>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigSnapshot {
    pub available: bool,
    pub error: Option<String>,
    pub channels: Vec<f64>,
    pub base_channel: usize,
    pub base_positions: Vec<f64>,
    pub closed_angle: f64,
    pub open_angle: f64,
    #[serde(rename = "diagnosticBaseToValveDelayS")]
    pub diagnostic_base_to_valve_delay_s: f64,
    pub stirrer_durations: Vec<u32>,
    pub stirrer_active: bool,
}

pub struct RigController {
    config: RigConfig,
    availability: Availability,
    channels: Mutex<Vec<Box<dyn PwmChannel>>>,
    stirrer: Mutex<Option<Box<dyn StirrerLine>>>,
    angles: Mutex<Vec<f64>>,
    stirrer_active: AtomicBool,
}

impl RigController {
    pub fn new(config: RigConfig, hardware: Result<RigHardware, HalError>) -> Self {
        let mut rig = Self {
            angles: Mutex::new(vec![0.0; config.channels]),
            availability: Availability::online(),
            channels: Mutex::new(Vec::new()),
            stirrer: Mutex::new(None),
            stirrer_active: AtomicBool::new(false),
            config,
        };
        match hardware {
            Ok(hw) if hw.channels.len() < rig.config.channels => {
                rig.availability = Availability::offline(format!(
                    "expected {} pwm channels, found {}",
                    rig.config.channels,
                    hw.channels.len()
                ));
            }
            Ok(hw) => {
                *rig.channels.get_mut() = hw.channels;
                *rig.stirrer.get_mut() = hw.stirrer;
                if let Err(e) = rig.initialise_outputs() {
                    rig.availability = Availability::offline(e.to_string());
                }
            }
            Err(e) => rig.availability = Availability::offline(e.to_string()),
        }
        if let Some(reason) = &rig.availability.error {
            warn!(reason, "rig unavailable");
        }
        rig
    }

    fn initialise_outputs(&mut self) -> Result<(), HalError> {
        let count = self.config.channels;
        let mut angles = Vec::with_capacity(count);
        for channel in 0..count {
            let angle = if self.config.init_servos_on_start {
                let target = self.clamp_angle_for_channel(channel, self.config.default_angle);
                self.channels.get_mut()[channel].set_angle(target)?;
                target
            } else {
                let current = self.channels.get_mut()[channel]
                    .angle()
                    .unwrap_or(self.config.default_angle);
                self.clamp_angle_for_channel(channel, current)
            };
            angles.push(angle);
        }
        *self.angles.get_mut() = angles;
        if let Some(line) = self.stirrer.get_mut() {
            line.set_level(false)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn ensure_available(&self) -> Result<(), RigError> {
        self.availability.ensure(Device::Rig)
    }

    pub fn base_channel(&self) -> usize {
        self.config.base_channel
    }

    /// Snap `angle` to the nearest legal value for `channel`.
    ///
    /// Base: nearest configured stop, ties going to the earlier stop.
    /// Valves: open at or above the closed/open midpoint, closed below it.
    pub fn clamp_angle_for_channel(&self, channel: usize, angle: f64) -> f64 {
        if channel == self.config.base_channel {
            let mut best: Option<f64> = None;
            for &stop in &self.config.base_positions {
                match best {
                    Some(b) if (b - angle).abs() <= (stop - angle).abs() => {}
                    _ => best = Some(stop),
                }
            }
            return best.unwrap_or(angle);
        }
        let (closed, open) = (self.config.closed_angle, self.config.open_angle);
        let midpoint = (closed + open) / 2.0;
        let opens = if open >= closed {
            angle >= midpoint
        } else {
            angle <= midpoint
        };
        if opens { open } else { closed }
    }

    /// Snap and write one channel. Returns the angle applied.
    pub fn set_channel_immediate(&self, channel: usize, angle: f64) -> Result<f64, RigError> {
        self.ensure_available()?;
        if channel >= self.config.channels {
            return Err(RigError::InvalidArgument("invalid_channel"));
        }
        let target = self.clamp_angle_for_channel(channel, angle);
        {
            let mut channels = self.channels.lock();
            channels[channel]
                .set_angle(target)
                .map_err(|e| e.into_rig(Device::Rig))?;
        }
        self.angles.lock()[channel] = target;
        Ok(target)
    }

    /// Swing the carousel to the stop nearest `target` and wait out the
    /// travel time. The only write happens before the first suspension
    /// point, so dropping this future mid-travel never leaves a stale write
    /// behind.
    pub async fn move_base_servo(&self, target: f64) -> Result<f64, RigError> {
        let base = self.config.base_channel;
        let previous = self.channel_angle(base);
        let applied = self.set_channel_immediate(base, target)?;
        if previous != Some(applied) {
            tokio::time::sleep(self.config.base_travel()).await;
        }
        Ok(applied)
    }

    /// Drive the stirrer line high. The returned guard turns it off again
    /// when dropped.
    pub fn stirrer_on(&self) -> Result<StirrerGuard<'_>, RigError> {
        self.ensure_available()?;
        let mut line = self.stirrer.lock();
        let Some(line) = line.as_mut() else {
            return Err(RigError::unavailable(Device::Rig, "stirrer_not_initialized"));
        };
        self.stirrer_active.store(true, Ordering::SeqCst);
        if let Err(e) = line.set_level(true) {
            self.stirrer_active.store(false, Ordering::SeqCst);
            return Err(e.into_rig(Device::Rig));
        }
        Ok(StirrerGuard(self))
    }

    /// Run the stirrer for `duration`. The line is driven low and the active
    /// flag cleared on every exit, including when this future is dropped.
    pub async fn run_stirrer(&self, duration: Duration) -> Result<(), RigError> {
        let _on = self.stirrer_on()?;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    /// Best-effort stop: clears the flag and drives the line low, logging
    /// rather than returning any failure.
    pub fn force_stirrer_off(&self) {
        self.stirrer_active.store(false, Ordering::SeqCst);
        if let Some(line) = self.stirrer.lock().as_mut()
            && let Err(e) = line.set_level(false)
        {
            error!(error = %e, "failed to drive stirrer line low");
        }
    }

    pub fn is_stirrer_active(&self) -> bool {
        self.stirrer_active.load(Ordering::SeqCst)
    }

    pub fn close_non_base_servos(&self) -> Result<(), RigError> {
        self.ensure_available()?;
        for channel in (0..self.config.channels).filter(|&c| c != self.config.base_channel) {
            self.set_channel_immediate(channel, self.config.closed_angle)?;
        }
        Ok(())
    }

    /// Put the rig in its safe state: stirrer off, valves closed.
    pub fn shutdown(&self) {
        self.force_stirrer_off();
        if self.availability.available
            && let Err(e) = self.close_non_base_servos()
        {
            error!(error = %e, "failed to close valves during shutdown");
        }
    }

    pub fn channel_angle(&self, channel: usize) -> Option<f64> {
        self.angles.lock().get(channel).copied()
    }

    pub fn snapshot(&self) -> RigSnapshot {
        RigSnapshot {
            available: self.availability.available,
            error: self.availability.error.clone(),
            channels: self.angles.lock().clone(),
            base_channel: self.config.base_channel,
            base_positions: self.config.base_positions.clone(),
            closed_angle: self.config.closed_angle,
            open_angle: self.config.open_angle,
            diagnostic_base_to_valve_delay_s: self.config.base_to_valve_delay_s,
            stirrer_durations: self.config.stirrer_durations_s.clone(),
            stirrer_active: self.is_stirrer_active(),
        }
    }
}

impl Drop for RigController {
    fn drop(&mut self) {
        self.force_stirrer_off();
    }
}

/// Keeps the stirrer running; see [`RigController::stirrer_on`].
pub struct StirrerGuard<'a>(&'a RigController);

impl Drop for StirrerGuard<'_> {
    fn drop(&mut self) {
        self.0.force_stirrer_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrig_hal::sim::{SimPwmBoard, SimStirrerLine};

    fn sim_rig(config: RigConfig) -> (RigController, SimPwmBoard, SimStirrerLine) {
        let board = SimPwmBoard::new();
        let line = SimStirrerLine::new();
        let hw = RigHardware {
            channels: (0..config.channels)
                .map(|c| Box::new(board.channel(c)) as Box<dyn PwmChannel>)
                .collect(),
            stirrer: Some(Box::new(line.clone())),
        };
        (RigController::new(config, Ok(hw)), board, line)
    }

    fn fast() -> RigConfig {
        RigConfig {
            base_travel_s: 0.0,
            ..RigConfig::default()
        }
    }

    #[test]
    fn valve_below_midpoint_snaps_closed() {
        let (rig, board, _) = sim_rig(fast());
        assert_eq!(rig.set_channel_immediate(2, 44.9).unwrap(), 0.0);
        assert_eq!(rig.channel_angle(2), Some(0.0));
        assert_eq!(board.angle(2), Some(0.0));
        assert_eq!(rig.set_channel_immediate(2, 45.0).unwrap(), 90.0);
        assert_eq!(rig.set_channel_immediate(2, 400.0).unwrap(), 90.0);
    }

    #[test]
    fn base_snaps_to_nearest_stop_ties_to_first() {
        let (rig, _, _) = sim_rig(fast());
        assert_eq!(rig.clamp_angle_for_channel(0, 100.0), 120.0);
        assert_eq!(rig.clamp_angle_for_channel(0, 60.0), 0.0);
        assert_eq!(rig.clamp_angle_for_channel(0, 180.0), 120.0);
        assert_eq!(rig.clamp_angle_for_channel(0, -30.0), 0.0);
        assert_eq!(rig.clamp_angle_for_channel(0, 1000.0), 240.0);
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let (rig, _, _) = sim_rig(fast());
        let err = rig.set_channel_immediate(4, 0.0).unwrap_err();
        assert_eq!(err.to_string(), "invalid_channel");
    }

    #[test]
    fn startup_syncs_from_outputs_when_not_initialising() {
        let board = SimPwmBoard::new();
        board.preset(0, 130.0);
        board.preset(1, 80.0);
        let config = RigConfig {
            init_servos_on_start: false,
            ..fast()
        };
        let hw = RigHardware {
            channels: (0..4)
                .map(|c| Box::new(board.channel(c)) as Box<dyn PwmChannel>)
                .collect(),
            stirrer: None,
        };
        let rig = RigController::new(config, Ok(hw));
        assert_eq!(rig.snapshot().channels, vec![120.0, 90.0, 0.0, 0.0]);
        assert!(board.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stirrer_cleans_up_after_run() {
        let (rig, _, line) = sim_rig(fast());
        rig.run_stirrer(Duration::from_secs(5)).await.unwrap();
        assert!(!rig.is_stirrer_active());
        assert_eq!(line.transitions(), vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn stirrer_cleans_up_when_cancelled() {
        let (rig, _, line) = sim_rig(fast());
        let run = rig.run_stirrer(Duration::from_secs(60));
        let cancelled = tokio::time::timeout(Duration::from_secs(1), run).await;
        assert!(cancelled.is_err());
        assert!(!rig.is_stirrer_active());
        assert!(!line.is_high());
    }

    #[tokio::test]
    async fn stirrer_missing_is_reported() {
        let board = SimPwmBoard::new();
        let hw = RigHardware {
            channels: (0..4)
                .map(|c| Box::new(board.channel(c)) as Box<dyn PwmChannel>)
                .collect(),
            stirrer: None,
        };
        let rig = RigController::new(fast(), Ok(hw));
        let err = rig.run_stirrer(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "rig_unavailable:stirrer_not_initialized");
    }

    #[test]
    fn force_off_swallows_gpio_errors() {
        let (rig, _, line) = sim_rig(fast());
        line.set_failing(true);
        rig.force_stirrer_off();
        assert!(!rig.is_stirrer_active());
    }

    #[test]
    fn close_non_base_leaves_base_alone() {
        let (rig, _, _) = sim_rig(fast());
        rig.set_channel_immediate(0, 240.0).unwrap();
        for ch in 1..4 {
            rig.set_channel_immediate(ch, 90.0).unwrap();
        }
        rig.close_non_base_servos().unwrap();
        assert_eq!(rig.snapshot().channels, vec![240.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn detached_rig_is_unavailable_with_full_snapshot() {
        let rig = RigController::new(fast(), Err(HalError::NotAttached("pca9685".into())));
        assert!(rig.set_channel_immediate(1, 90.0).is_err());
        let json = serde_json::to_value(rig.snapshot()).unwrap();
        assert_eq!(json["available"], false);
        assert_eq!(json["channels"], serde_json::json!([0.0, 0.0, 0.0, 0.0]));
        assert_eq!(json["diagnosticBaseToValveDelayS"], 0.5);
        assert_eq!(json["stirrerActive"], false);
    }
}
