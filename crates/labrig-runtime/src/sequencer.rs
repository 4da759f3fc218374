//! [`Sequencer`] – multi-step rig and arm procedures built from controller
//! primitives.
//!
//! Three preemption axes (base move, stirrer, diagnostic) each hold at most
//! one running task. Dispense and cleanup share an automation lock that is
//! tried, never waited on.

use std::sync::Arc;
use std::time::Duration;

use labrig_devices::{ArmController, CameraController, RigController};
use labrig_types::{AutomationConfig, Device, RigError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::notify::{DiagnosticStatus, RigNotifier, StatusReporter};
use crate::slot::{PreemptibleSlot, cancellable};
use crate::volume::VolumeEstimator;

/// Thermal pause reason held while the carousel is swinging.
pub const BASE_MOVE_PAUSE: &str = "rig_base_move";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseReport {
    pub dropper: usize,
    pub sends: u32,
    pub requested_amount_ml: f64,
    pub dispensed_amount_ml: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub steps: usize,
    pub move_ms: u32,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub struct Sequencer {
    arm: Arc<ArmController>,
    rig: Arc<RigController>,
    thermal: Arc<CameraController>,
    volume: Arc<VolumeEstimator>,
    notifier: Arc<dyn RigNotifier>,
    automation: AutomationConfig,
    base: PreemptibleSlot,
    stirrer: PreemptibleSlot,
    diagnostic: PreemptibleSlot,
    automation_lock: tokio::sync::Mutex<()>,
}

impl Sequencer {
    pub fn new(
        arm: Arc<ArmController>,
        rig: Arc<RigController>,
        thermal: Arc<CameraController>,
        volume: Arc<VolumeEstimator>,
        notifier: Arc<dyn RigNotifier>,
        automation: AutomationConfig,
    ) -> Self {
        Self {
            arm,
            rig,
            thermal,
            volume,
            notifier,
            automation,
            base: PreemptibleSlot::new("base"),
            stirrer: PreemptibleSlot::new("stirrer"),
            diagnostic: PreemptibleSlot::new("diagnostic"),
            automation_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn arm(&self) -> &Arc<ArmController> {
        &self.arm
    }

    pub fn rig(&self) -> &Arc<RigController> {
        &self.rig
    }

    pub fn volume(&self) -> &Arc<VolumeEstimator> {
        &self.volume
    }

    pub fn is_diagnostic_running(&self) -> bool {
        self.diagnostic.is_active()
    }

    async fn move_base(&self, target: f64) -> Result<f64, RigError> {
        let _paused = self.thermal.pause(BASE_MOVE_PAUSE);
        self.rig.move_base_servo(target).await
    }

    /// Stirrer high for `duration`; low again on every exit path.
    async fn stir_for(&self, duration: Duration) -> Result<(), RigError> {
        let _on = self.rig.stirrer_on()?;
        self.notifier.state_changed().await;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    // ── Ad hoc rig commands ─────────────────────────────────────────────────

    /// Set one rig channel. Returns the snapped angle.
    ///
    /// Valve writes happen before returning. A base move is handed to the
    /// base slot and acknowledged immediately; a second base move supersedes
    /// the first. Either kind cancels a running diagnostic.
    pub async fn set_rig_channel(
        self: &Arc<Self>,
        channel: i64,
        angle: f64,
    ) -> Result<f64, RigError> {
        self.rig.ensure_available()?;
        let channel = usize::try_from(channel)
            .ok()
            .filter(|&c| c < self.rig.config().channels)
            .ok_or(RigError::InvalidArgument("invalid_channel"))?;
        let target = self.rig.clamp_angle_for_channel(channel, angle);
        let preempted = self.diagnostic.cancel();

        if channel == self.rig.base_channel() {
            let seq = self.clone();
            drop(self.base.supersede(preempted, move |token| async move {
                let result = cancellable(&token, seq.move_base(target)).await;
                seq.notifier.state_changed().await;
                result
            }));
            return Ok(target);
        }

        // A cancelled diagnostic closes every valve on its way out.
        preempted.finished().await;
        self.rig.set_channel_immediate(channel, target)
    }

    /// Run the stirrer for one of the configured fixed durations.
    pub fn rig_stir(self: &Arc<Self>, duration_s: i64) -> Result<u32, RigError> {
        self.rig.ensure_available()?;
        let duration = u32::try_from(duration_s)
            .ok()
            .filter(|d| self.rig.config().stirrer_durations_s.contains(d))
            .ok_or(RigError::InvalidArgument("invalid_duration"))?;
        let preempted = self.diagnostic.cancel();
        let seq = self.clone();
        drop(self.stirrer.supersede(preempted, move |token| async move {
            let result = cancellable(
                &token,
                seq.stir_for(Duration::from_secs(u64::from(duration))),
            )
            .await;
            seq.notifier.state_changed().await;
            result
        }));
        Ok(duration)
    }

    // ── Diagnostic ──────────────────────────────────────────────────────────

    /// Start the per-dropper diagnostic in the background. Returns the
    /// base-to-valve delay in effect.
    pub fn start_diagnostic(
        self: &Arc<Self>,
        base_to_valve_delay_s: Option<f64>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<f64, RigError> {
        self.rig.ensure_available()?;
        let delay_s = base_to_valve_delay_s.unwrap_or(self.rig.config().base_to_valve_delay_s);
        if !delay_s.is_finite() || delay_s < 0.0 {
            return Err(RigError::InvalidArgument("invalid_base_to_valve_delay"));
        }
        let preempted = self.base.cancel().and(self.stirrer.cancel());
        let seq = self.clone();
        drop(self.diagnostic.supersede(preempted, move |token| async move {
            seq.run_diagnostic(&token, delay_s, reporter).await
        }));
        info!(delay_s, "diagnostic started");
        Ok(delay_s)
    }

    async fn run_diagnostic(
        &self,
        token: &CancellationToken,
        delay_s: f64,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<(), RigError> {
        let result = cancellable(token, self.diagnostic_steps(delay_s, reporter.as_ref())).await;
        if let Err(e) = &result {
            match e {
                RigError::Cancelled => info!("diagnostic cancelled"),
                other => warn!(error = %other, "diagnostic failed"),
            }
            self.rig.force_stirrer_off();
            if let Err(e) = self.rig.close_non_base_servos() {
                warn!(error = %e, "failed to close valves after diagnostic");
            }
            self.notifier.state_changed().await;
        }
        result
    }

    async fn diagnostic_steps(
        &self,
        delay_s: f64,
        reporter: &dyn StatusReporter,
    ) -> Result<(), RigError> {
        let config = self.rig.config();
        let delay = Duration::from_secs_f64(delay_s);
        let droppers = config.dropper_count();

        self.rig.close_non_base_servos()?;
        self.rig.force_stirrer_off();
        if let Some(&home) = config.base_positions.first() {
            self.move_base(home).await?;
        }
        tokio::time::sleep(delay).await;
        self.notifier.state_changed().await;
        reporter
            .diagnostic(DiagnosticStatus::Initialized {
                base_to_valve_delay_s: delay_s,
            })
            .await;

        for index in 0..droppers {
            if index > 0 {
                self.move_base(config.base_positions[index]).await?;
                self.notifier.state_changed().await;
                tokio::time::sleep(delay).await;
            }
            let valve = config.valve_channels[index];
            self.rig.set_channel_immediate(valve, config.open_angle)?;
            self.notifier.state_changed().await;
            tokio::time::sleep(config.diagnostic_open()).await;
            self.rig.set_channel_immediate(valve, config.closed_angle)?;
            self.notifier.state_changed().await;
            if index + 1 < droppers {
                tokio::time::sleep(config.diagnostic_post_close()).await;
            }
        }

        self.stir_for(config.diagnostic_stirrer()).await?;
        self.notifier.state_changed().await;
        reporter.diagnostic(DiagnosticStatus::Completed).await;
        info!("diagnostic completed");
        Ok(())
    }

    // ── Automation ──────────────────────────────────────────────────────────

    /// Pulse `dropper`'s valve until at least `amount_ml` has been sent.
    ///
    /// # Errors
    ///
    /// [`RigError::Busy`] while another dispense or cleanup holds the
    /// automation lock. `invalid_amount_ml` when the amount would need more
    /// than `max_sends` pulses.
    pub async fn dispense(&self, dropper: i64, amount_ml: f64) -> Result<DispenseReport, RigError> {
        let Ok(_automation) = self.automation_lock.try_lock() else {
            return Err(RigError::Busy);
        };
        self.rig.ensure_available()?;
        let config = self.rig.config();
        let dropper = usize::try_from(dropper)
            .ok()
            .filter(|d| (1..=config.dropper_count()).contains(d))
            .ok_or(RigError::InvalidArgument("invalid_dropper"))?;
        if !amount_ml.is_finite() || amount_ml <= 0.0 {
            return Err(RigError::InvalidArgument("invalid_amount_ml"));
        }
        let per_send = self.automation.ml_per_send;
        if !per_send.is_finite() || per_send <= 0.0 {
            return Err(RigError::fault("automation", "ml_per_send must be positive"));
        }
        let sends = (amount_ml / per_send).ceil().max(1.0);
        if sends > f64::from(self.automation.max_sends) {
            return Err(RigError::InvalidArgument("invalid_amount_ml"));
        }
        let sends = sends as u32;

        self.diagnostic
            .cancel()
            .and(self.base.cancel())
            .finished()
            .await;

        info!(dropper, amount_ml, sends, "dispense started");
        let result = self.dispense_steps(dropper, sends).await;
        if result.is_err() {
            if let Err(e) = self.rig.close_non_base_servos() {
                warn!(error = %e, "failed to close valves after dispense error");
            }
            self.notifier.state_changed().await;
        }
        result?;

        Ok(DispenseReport {
            dropper,
            sends,
            requested_amount_ml: round3(amount_ml),
            dispensed_amount_ml: round3(f64::from(sends) * per_send),
        })
    }

    async fn dispense_steps(&self, dropper: usize, sends: u32) -> Result<(), RigError> {
        let config = self.rig.config();
        let index = dropper - 1;
        let target = config.base_positions[index];
        let valve = config.valve_channels[index];

        self.rig.close_non_base_servos()?;
        self.notifier.state_changed().await;

        let at_target = self
            .rig
            .channel_angle(config.base_channel)
            .is_some_and(|current| current.round() == target.round());
        if !at_target {
            self.move_base(target).await?;
            self.notifier.state_changed().await;
            tokio::time::sleep(Duration::from_secs_f64(config.base_to_valve_delay_s.max(0.0)))
                .await;
        }

        for send in 0..sends {
            self.rig.set_channel_immediate(valve, config.open_angle)?;
            self.notifier.state_changed().await;
            tokio::time::sleep(self.automation.valve_open()).await;
            self.rig.set_channel_immediate(valve, config.closed_angle)?;
            if self.automation.is_volume_dropper(dropper) {
                self.volume.enable_for(self.automation.volume_window());
            }
            self.notifier.state_changed().await;
            if send + 1 < sends {
                tokio::time::sleep(self.automation.between_sends()).await;
            }
        }
        Ok(())
    }

    /// Walk the arm through the configured cleanup poses.
    pub async fn cleanup(&self, move_ms: u32) -> Result<CleanupReport, RigError> {
        let Ok(_automation) = self.automation_lock.try_lock() else {
            return Err(RigError::Busy);
        };
        self.arm.availability().ensure(Device::Arm)?;
        let ids = &self.arm.config().servo_ids;
        let poses = &self.automation.cleanup_sequence_deg;
        if let Some(step) = poses.iter().position(|pose| pose.len() != ids.len()) {
            return Err(RigError::CleanupStepInvalid { step });
        }

        info!(steps = poses.len(), move_ms, "cleanup started");
        let mut applied_ms = move_ms;
        for pose in poses {
            let targets: Vec<(i64, f64)> = ids
                .iter()
                .zip(pose)
                .map(|(&id, &angle)| (i64::from(id), angle))
                .collect();
            applied_ms = self.arm.set_many(&targets, move_ms).await?;
            self.notifier.state_changed().await;
            tokio::time::sleep(Duration::from_millis(u64::from(applied_ms))).await;
        }
        Ok(CleanupReport {
            steps: poses.len(),
            move_ms: applied_ms,
        })
    }

    /// Stir for a free duration up to the configured maximum and wait for it
    /// to finish. A later stir or diagnostic ends it with
    /// [`RigError::Cancelled`].
    pub async fn automation_stir(self: &Arc<Self>, duration_s: f64) -> Result<f64, RigError> {
        self.rig.ensure_available()?;
        if !duration_s.is_finite()
            || duration_s <= 0.0
            || duration_s > self.automation.stir_max_duration_s
        {
            return Err(RigError::InvalidArgument("invalid_duration_s"));
        }
        let preempted = self.diagnostic.cancel();
        let seq = self.clone();
        let done = self.stirrer.supersede(preempted, move |token| async move {
            let result = cancellable(&token, seq.stir_for(Duration::from_secs_f64(duration_s))).await;
            seq.notifier.state_changed().await;
            result
        });
        done.await.map_err(|_| RigError::Cancelled)??;
        Ok(round3(duration_s))
    }

    /// Cancel every axis, wait for their cleanup, then park the rig safely.
    pub async fn shutdown(&self) {
        self.diagnostic.shutdown().await;
        self.base.shutdown().await;
        self.stirrer.shutdown().await;
        self.rig.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use crate::volume::VolumeReading;
    use async_trait::async_trait;
    use labrig_devices::RigHardware;
    use labrig_hal::HalError;
    use labrig_hal::sim::{SimPwmBoard, SimServoBus, SimStirrerLine};
    use labrig_types::{ArmConfig, RigConfig, VolumeConfig, WebcamConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        broadcasts: AtomicU32,
        statuses: Mutex<Vec<DiagnosticStatus>>,
    }

    #[async_trait]
    impl RigNotifier for Recorder {
        async fn state_changed(&self) {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
        }

        async fn volume_updated(&self, _reading: VolumeReading) {}

        fn has_listeners(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl StatusReporter for Recorder {
        async fn diagnostic(&self, status: DiagnosticStatus) {
            self.statuses.lock().push(status);
        }
    }

    struct Harness {
        seq: Arc<Sequencer>,
        board: SimPwmBoard,
        line: SimStirrerLine,
        recorder: Arc<Recorder>,
    }

    fn harness_with(automation: AutomationConfig) -> Harness {
        let config = RigConfig::default();
        let board = SimPwmBoard::new();
        let line = SimStirrerLine::new();
        let hardware = RigHardware {
            channels: (0..config.channels)
                .map(|c| Box::new(board.channel(c)) as Box<dyn labrig_hal::PwmChannel>)
                .collect(),
            stirrer: Some(Box::new(line.clone())),
        };
        let rig = Arc::new(RigController::new(config, Ok(hardware)));
        let arm_config = ArmConfig::default();
        let bus = SimServoBus::new(&arm_config.servo_ids, 500);
        let arm = Arc::new(ArmController::new(arm_config, Ok(Box::new(bus))));
        let thermal = Arc::new(CameraController::thermal(
            &Default::default(),
            8081,
            Err(HalError::NotAttached("none".into())),
        ));
        let webcam = Arc::new(CameraController::webcam(
            &WebcamConfig::default(),
            8081,
            Err(HalError::NotAttached("none".into())),
        ));
        let recorder = Arc::new(Recorder::default());
        let volume = Arc::new(VolumeEstimator::new(
            &VolumeConfig::default(),
            None,
            webcam,
            Arc::new(NullNotifier),
        ));
        let seq = Arc::new(Sequencer::new(
            arm,
            rig,
            thermal,
            volume,
            recorder.clone(),
            automation,
        ));
        Harness {
            seq,
            board,
            line,
            recorder,
        }
    }

    fn harness() -> Harness {
        harness_with(AutomationConfig::default())
    }

    fn opens(board: &SimPwmBoard, channel: usize) -> usize {
        board
            .writes()
            .iter()
            .filter(|&&(c, angle)| c == channel && angle == 90.0)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn dispense_rounds_up_to_whole_sends() {
        let h = harness();
        let report = h.seq.dispense(1, 7.0).await.unwrap();
        assert_eq!(
            report,
            DispenseReport {
                dropper: 1,
                sends: 2,
                requested_amount_ml: 7.0,
                dispensed_amount_ml: 10.0,
            }
        );
        assert_eq!(opens(&h.board, 1), 2);
        assert_eq!(h.seq.rig().channel_angle(1), Some(0.0));
        assert!(h.recorder.broadcasts.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn dispense_moves_base_to_dropper() {
        let h = harness();
        h.seq.dispense(2, 5.0).await.unwrap();
        assert_eq!(h.seq.rig().channel_angle(0), Some(120.0));
        assert_eq!(opens(&h.board, 2), 1);
        assert!(!h.seq.thermal.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn dispense_validates_arguments() {
        let h = harness();
        assert_eq!(
            h.seq.dispense(0, 5.0).await,
            Err(RigError::InvalidArgument("invalid_dropper"))
        );
        assert_eq!(
            h.seq.dispense(4, 5.0).await,
            Err(RigError::InvalidArgument("invalid_dropper"))
        );
        assert_eq!(
            h.seq.dispense(1, 0.0).await,
            Err(RigError::InvalidArgument("invalid_amount_ml"))
        );
        assert_eq!(
            h.seq.dispense(1, f64::NAN).await,
            Err(RigError::InvalidArgument("invalid_amount_ml"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_dispense_is_rejected_before_any_pulse() {
        let h = harness_with(AutomationConfig {
            max_sends: 4,
            ..AutomationConfig::default()
        });
        assert_eq!(
            h.seq.dispense(1, 1e12).await,
            Err(RigError::InvalidArgument("invalid_amount_ml"))
        );
        assert_eq!(
            h.seq.dispense(1, 20.01).await,
            Err(RigError::InvalidArgument("invalid_amount_ml"))
        );
        assert_eq!(opens(&h.board, 1), 0);

        let report = h.seq.dispense(1, 20.0).await.unwrap();
        assert_eq!(report.sends, 4);
        assert_eq!(opens(&h.board, 1), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_automation_is_rejected() {
        let h = harness();
        let seq = h.seq.clone();
        let first = tokio::spawn(async move { seq.dispense(2, 15.0).await });
        tokio::task::yield_now().await;

        assert_eq!(h.seq.dispense(1, 5.0).await, Err(RigError::Busy));
        assert_eq!(h.seq.cleanup(100).await, Err(RigError::Busy));

        let report = first.await.unwrap().unwrap();
        assert_eq!(report.sends, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_window_follows_sensed_dropper() {
        let h = harness();
        h.seq.dispense(1, 5.0).await.unwrap();
        assert!(!h.seq.volume().is_enabled());
        h.seq.dispense(3, 5.0).await.unwrap();
        assert!(h.seq.volume().is_enabled());

        let h = harness_with(AutomationConfig {
            volume_dropper: 0,
            ..AutomationConfig::default()
        });
        h.seq.dispense(3, 5.0).await.unwrap();
        assert!(!h.seq.volume().is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_rig_rejects_dispense() {
        let rig = Arc::new(RigController::new(
            RigConfig::default(),
            Err(HalError::NotAttached("none".into())),
        ));
        let h = harness();
        let seq = Arc::new(Sequencer::new(
            h.seq.arm.clone(),
            rig,
            h.seq.thermal.clone(),
            h.seq.volume.clone(),
            Arc::new(NullNotifier),
            AutomationConfig::default(),
        ));
        let err = seq.dispense(1, 5.0).await.unwrap_err();
        assert!(err.to_string().starts_with("rig_unavailable:"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn second_base_move_wins() {
        let h = harness();
        assert_eq!(h.seq.set_rig_channel(0, 110.0).await, Ok(120.0));
        tokio::task::yield_now().await;
        assert_eq!(h.seq.set_rig_channel(0, 250.0).await, Ok(240.0));
        tokio::time::sleep(Duration::from_secs(3)).await;

        let base_writes: Vec<f64> = h
            .board
            .writes()
            .into_iter()
            .filter(|&(c, _)| c == 0)
            .map(|(_, a)| a)
            .collect();
        assert_eq!(base_writes.last(), Some(&240.0));
        assert_eq!(h.seq.rig().channel_angle(0), Some(240.0));
        assert!(!h.seq.thermal.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn valve_set_snaps_to_closed() {
        let h = harness();
        assert_eq!(h.seq.set_rig_channel(2, 30.0).await, Ok(0.0));
        assert_eq!(h.seq.set_rig_channel(2, 60.0).await, Ok(90.0));
        assert_eq!(h.seq.rig().channel_angle(2), Some(90.0));
        assert_eq!(
            h.seq.set_rig_channel(9, 0.0).await,
            Err(RigError::InvalidArgument("invalid_channel"))
        );
        assert_eq!(
            h.seq.set_rig_channel(-1, 0.0).await,
            Err(RigError::InvalidArgument("invalid_channel"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_diagnostic_leaves_rig_safe() {
        let h = harness();
        let delay = h.seq.start_diagnostic(Some(0.5), h.recorder.clone()).unwrap();
        assert_eq!(delay, 0.5);

        // Past the settle delay and into the first valve pulse.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(h.seq.rig().channel_angle(1), Some(90.0));
        assert_eq!(
            *h.recorder.statuses.lock(),
            vec![DiagnosticStatus::Initialized {
                base_to_valve_delay_s: 0.5
            }]
        );

        h.seq.set_rig_channel(0, 120.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        for valve in [1, 2, 3] {
            assert_eq!(h.seq.rig().channel_angle(valve), Some(0.0));
        }
        assert!(!h.seq.rig().is_stirrer_active());
        assert!(!h.line.is_high());
        assert!(!h.seq.is_diagnostic_running());
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostic_runs_to_completion() {
        let h = harness();
        h.seq.start_diagnostic(None, h.recorder.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let statuses = h.recorder.statuses.lock().clone();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1], DiagnosticStatus::Completed);
        for valve in [1, 2, 3] {
            assert_eq!(opens(&h.board, valve), 1);
        }
        let levels = h.line.transitions();
        assert_eq!(levels.iter().filter(|&&high| high).count(), 1);
        assert_eq!(levels.last(), Some(&false));
        assert!(!h.seq.rig().is_stirrer_active());
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostic_rejects_bad_delay() {
        let h = harness();
        for bad in [-1.0, f64::INFINITY, f64::NAN] {
            assert_eq!(
                h.seq.start_diagnostic(Some(bad), h.recorder.clone()),
                Err(RigError::InvalidArgument("invalid_base_to_valve_delay"))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rig_stir_accepts_configured_durations_only() {
        let h = harness();
        assert_eq!(
            h.seq.rig_stir(3),
            Err(RigError::InvalidArgument("invalid_duration"))
        );
        assert_eq!(h.seq.rig_stir(1), Ok(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.seq.rig().is_stirrer_active());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!h.seq.rig().is_stirrer_active());
        assert!(!h.line.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn automation_stir_waits_and_can_be_preempted() {
        let h = harness();
        assert_eq!(h.seq.automation_stir(1.25).await, Ok(1.25));
        assert!(!h.seq.rig().is_stirrer_active());

        for bad in [0.0, 601.0, f64::NAN] {
            assert_eq!(
                h.seq.automation_stir(bad).await,
                Err(RigError::InvalidArgument("invalid_duration_s"))
            );
        }

        let seq = h.seq.clone();
        let long = tokio::spawn(async move { seq.automation_stir(60.0).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.seq.rig_stir(1).unwrap();
        assert_eq!(long.await.unwrap(), Err(RigError::Cancelled));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.seq.rig().is_stirrer_active());
        assert!(h.line.is_high());
    }

    #[tokio::test]
    async fn cleanup_walks_every_pose() {
        let h = harness();
        let report = h.seq.cleanup(100).await.unwrap();
        assert_eq!(
            report,
            CleanupReport {
                steps: 4,
                move_ms: 100
            }
        );
    }

    #[tokio::test]
    async fn cleanup_rejects_short_pose() {
        let mut automation = AutomationConfig::default();
        automation.cleanup_sequence_deg[1].pop();
        let h = harness_with(automation);
        assert_eq!(
            h.seq.cleanup(100).await,
            Err(RigError::CleanupStepInvalid { step: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_parks_the_rig() {
        let h = harness();
        h.seq.rig_stir(10).unwrap();
        h.seq.set_rig_channel(1, 90.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.seq.shutdown().await;
        assert!(!h.line.is_high());
        assert_eq!(h.seq.rig().channel_angle(1), Some(0.0));
    }
}
