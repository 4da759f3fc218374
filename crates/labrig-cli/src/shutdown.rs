//! Ordered teardown. The rig is parked before any loop is stopped, and each
//! loop gets a bounded time to wind down.

use std::time::Duration;

use labrig_devices::CameraController;
use labrig_runtime::{Sequencer, VolumeEstimator};
use tokio::time::timeout;
use tracing::{info, warn};

/// Upper bound on each loop's `stop`.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Cancel automation, turn the stirrer off and close the valves, then stop
/// the volume estimator and the cameras.
pub async fn park_and_stop(
    sequencer: &Sequencer,
    volume: &VolumeEstimator,
    cameras: &[&CameraController],
    stop_timeout: Duration,
) {
    sequencer.shutdown().await;
    info!("rig parked");

    if timeout(stop_timeout, volume.stop()).await.is_err() {
        warn!(timeout_s = stop_timeout.as_secs_f64(), "volume estimator did not stop in time");
    }
    for camera in cameras {
        if timeout(stop_timeout, camera.stop()).await.is_err() {
            warn!(
                camera = camera.kind().as_str(),
                timeout_s = stop_timeout.as_secs_f64(),
                "camera did not stop in time"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hardware;
    use labrig_devices::{
        ArmController, CameraKind, CaptureError, Captured, FrameSource, RigController,
    };
    use labrig_runtime::NullNotifier;
    use labrig_types::{Availability, LoopTiming};
    use std::sync::Arc;
    use std::time::Instant;

    struct Sluggish;

    impl FrameSource for Sluggish {
        fn capture(&mut self) -> Result<Option<Captured>, CaptureError> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(Some(Captured {
                jpeg: vec![0xFF, 0xD8],
                temps: None,
            }))
        }
    }

    fn sluggish_camera() -> Arc<CameraController> {
        Arc::new(CameraController::new(
            CameraKind::Thermal,
            LoopTiming {
                capture_interval: Duration::from_millis(5),
                fallback_interval: Duration::from_millis(5),
                error_log_interval: Duration::from_secs(10),
                broadcast_interval: Duration::ZERO,
            },
            "/thermal.mjpeg",
            8081,
            Availability::online(),
            Some(Box::new(Sluggish)),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rig_is_parked_even_when_a_camera_is_slow_to_stop() {
        let mut cfg = Config::default();
        cfg.server.simulate = true;
        let drivers = hardware::attach(&cfg);
        let arm = Arc::new(ArmController::new(cfg.arm.clone(), drivers.servo_bus));
        let rig = Arc::new(RigController::new(cfg.rig.clone(), drivers.rig));
        let thermal = sluggish_camera();
        let webcam = Arc::new(CameraController::webcam(
            &cfg.webcam,
            cfg.server.media_port,
            drivers.webcam,
        ));
        let volume = Arc::new(VolumeEstimator::new(
            &cfg.volume,
            None,
            webcam.clone(),
            Arc::new(NullNotifier),
        ));
        let sequencer = Arc::new(Sequencer::new(
            arm,
            rig.clone(),
            thermal.clone(),
            volume.clone(),
            Arc::new(NullNotifier),
            cfg.automation.clone(),
        ));

        thermal.start();
        sequencer.rig_stir(10).unwrap();
        sequencer.set_rig_channel(1, 90.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rig.is_stirrer_active());
        assert_eq!(rig.channel_angle(1), Some(90.0));

        let started = Instant::now();
        park_and_stop(
            &sequencer,
            &volume,
            &[&thermal, &webcam],
            Duration::from_millis(50),
        )
        .await;

        assert!(!rig.is_stirrer_active());
        assert_eq!(rig.channel_angle(1), Some(0.0));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
