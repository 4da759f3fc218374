//! [`CameraController`] – capture loop, pause reasons and frame fan-out for
//! one camera.
//!
//! The controller is camera-agnostic: a [`FrameSource`] (thermal renderer or
//! webcam pipeline) produces encoded JPEGs on the blocking pool and the loop
//! publishes them into a [`FrameSlot`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use labrig_hal::{HalError, ThermalSensor, VideoDevice};
use labrig_types::{Availability, Device, LoopTiming, ThermalConfig, WebcamConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::frame::{FPS_ALPHA, Frame, FrameSlot, TempRange, smooth};
use crate::thermal::ThermalPipeline;
use crate::webcam::WebcamPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraKind {
    Thermal,
    Webcam,
}

impl CameraKind {
    pub fn device(self) -> Device {
        match self {
            CameraKind::Thermal => Device::Thermal,
            CameraKind::Webcam => Device::Webcam,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.device().as_str()
    }
}

/// One encoded frame handed back by a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct Captured {
    pub jpeg: Vec<u8>,
    pub temps: Option<TempRange>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The device itself is gone; the code becomes the camera's error.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Blocking producer of encoded frames. Called on the blocking pool only.
pub trait FrameSource: Send {
    /// `Ok(None)` means nothing usable this cycle (e.g. retries exhausted).
    fn capture(&mut self) -> Result<Option<Captured>, CaptureError>;

    /// Release the device. Called once after the loop stops.
    fn shutdown(&mut self) {}
}

/// Receives throttled notifications after frames are published.
#[async_trait]
pub trait FrameListener: Send + Sync {
    async fn frame_published(&self, kind: CameraKind, status: CameraStatus);
}

/// Metadata snapshot; also the body of camera broadcasts and JSON endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub available: bool,
    pub error: Option<String>,
    pub frame_id: u64,
    pub max_temp_c: Option<f64>,
    pub min_temp_c: Option<f64>,
    pub fps: Option<f64>,
    pub updated_at_ms: Option<i64>,
    pub stream_path: String,
    pub http_port: u16,
}

type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

pub struct CameraController {
    kind: CameraKind,
    timing: LoopTiming,
    stream_path: String,
    http_port: u16,
    availability: RwLock<Availability>,
    source: Option<SharedSource>,
    slot: FrameSlot,
    pause_reasons: Mutex<HashSet<String>>,
    listener: RwLock<Option<Arc<dyn FrameListener>>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl CameraController {
    pub fn new(
        kind: CameraKind,
        timing: LoopTiming,
        stream_path: impl Into<String>,
        http_port: u16,
        availability: Availability,
        source: Option<Box<dyn FrameSource>>,
    ) -> Self {
        if let Some(reason) = &availability.error {
            warn!(camera = kind.as_str(), reason, "camera unavailable");
        }
        Self {
            kind,
            timing,
            stream_path: stream_path.into(),
            http_port,
            availability: RwLock::new(availability),
            source: source.map(|s| Arc::new(Mutex::new(s))),
            slot: FrameSlot::new(),
            pause_reasons: Mutex::new(HashSet::new()),
            listener: RwLock::new(None),
            task: Mutex::new(None),
        }
    }

    /// Thermal camera. Without a sensor the controller is permanently
    /// unavailable and [`start`](Self::start) does nothing.
    pub fn thermal(
        config: &ThermalConfig,
        http_port: u16,
        sensor: Result<Box<dyn ThermalSensor>, HalError>,
    ) -> Self {
        let (availability, source) = match sensor {
            Ok(sensor) => (
                Availability::online(),
                Some(Box::new(ThermalPipeline::new(config.clone(), sensor)) as Box<dyn FrameSource>),
            ),
            Err(e) => (Availability::offline(e.to_string()), None),
        };
        Self::new(
            CameraKind::Thermal,
            config.timing(),
            config.stream_path.clone(),
            http_port,
            availability,
            source,
        )
    }

    /// Webcam. The device is opened lazily by the capture loop, so the
    /// controller reports unavailable without an error until the first open.
    pub fn webcam(
        config: &WebcamConfig,
        http_port: u16,
        device: Result<Box<dyn VideoDevice>, HalError>,
    ) -> Self {
        let (availability, source) = match device {
            Ok(device) => (
                Availability {
                    available: false,
                    error: None,
                },
                Some(Box::new(WebcamPipeline::new(config.jpeg_quality, device)) as Box<dyn FrameSource>),
            ),
            Err(e) => (Availability::offline(e.to_string()), None),
        };
        Self::new(
            CameraKind::Webcam,
            config.timing(),
            config.stream_path.clone(),
            http_port,
            availability,
            source,
        )
    }

    pub fn kind(&self) -> CameraKind {
        self.kind
    }

    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    pub fn availability(&self) -> Availability {
        self.availability.read().clone()
    }

    pub fn set_listener(&self, listener: Arc<dyn FrameListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Spawn the capture loop. Idempotent; a camera without a source never
    /// starts.
    pub fn start(self: &Arc<Self>) {
        let Some(source) = self.source.clone() else {
            debug!(camera = self.kind.as_str(), "no frame source; capture not started");
            return;
        };
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, h)| !h.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.clone().capture_loop(source, token.clone()));
        *task = Some((token, handle));
        info!(camera = self.kind.as_str(), "capture loop started");
    }

    /// Cancel the capture loop and release the device. Idempotent.
    pub async fn stop(&self) {
        let running = self.task.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                error!(camera = self.kind.as_str(), error = %e, "capture task panicked");
            }
            info!(camera = self.kind.as_str(), "capture loop stopped");
        }
        if let Some(source) = self.source.clone() {
            let released = tokio::task::spawn_blocking(move || source.lock().shutdown()).await;
            if let Err(e) = released {
                error!(camera = self.kind.as_str(), error = %e, "failed to release camera");
            }
        }
    }

    pub fn set_paused(&self, reason: &str, paused: bool) {
        let mut reasons = self.pause_reasons.lock();
        if paused {
            reasons.insert(reason.to_string());
        } else {
            reasons.remove(reason);
        }
    }

    /// Pause capture under `reason` until the guard drops.
    pub fn pause(self: &Arc<Self>, reason: &'static str) -> PauseGuard {
        self.set_paused(reason, true);
        PauseGuard {
            camera: self.clone(),
            reason,
        }
    }

    pub fn is_paused(&self) -> bool {
        !self.pause_reasons.lock().is_empty()
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    pub fn frame_id(&self) -> u64 {
        self.slot.frame_id()
    }

    pub async fn wait_for_frame(&self, last_id: u64, timeout: Duration) -> Option<Arc<Frame>> {
        self.slot.wait_for_frame(last_id, timeout).await
    }

    pub fn status(&self) -> CameraStatus {
        let availability = self.availability();
        let latest = self.slot.latest();
        let frame = latest.as_deref();
        CameraStatus {
            available: availability.available,
            error: availability.error,
            frame_id: frame.map_or(0, |f| f.id),
            max_temp_c: frame.and_then(|f| f.temps).map(|t| t.max_c),
            min_temp_c: frame.and_then(|f| f.temps).map(|t| t.min_c),
            fps: frame.and_then(|f| f.fps),
            updated_at_ms: frame.map(|f| f.updated_at_ms),
            stream_path: self.stream_path.clone(),
            http_port: self.http_port,
        }
    }

    async fn capture_loop(self: Arc<Self>, source: SharedSource, token: CancellationToken) {
        let camera = self.kind.as_str();
        let log_limiter = limiter(self.timing.error_log_interval);
        let broadcast_limiter = limiter(self.timing.broadcast_interval);
        let log_allowed = || log_limiter.as_ref().is_none_or(|l| l.check().is_ok());

        let mut next_capture = Instant::now();
        let mut last_frame_at: Option<Instant> = None;
        let mut fps: Option<f64> = None;

        loop {
            if token.is_cancelled() {
                break;
            }
            if self.is_paused() {
                if sleep_or_cancel(&token, self.timing.fallback_interval).await {
                    break;
                }
                continue;
            }
            let now = Instant::now();
            if now < next_capture {
                if sleep_or_cancel(&token, next_capture - now).await {
                    break;
                }
                continue;
            }
            next_capture = now + self.timing.capture_interval;

            // An abandoned capture still holds the source lock, so `stop`
            // releases the device only after it returns.
            let capture = {
                let source = source.clone();
                tokio::task::spawn_blocking(move || source.lock().capture())
            };
            let cycle = tokio::select! {
                _ = token.cancelled() => break,
                cycle = capture => cycle,
            };
            let captured = match cycle {
                Ok(Ok(Some(captured))) => captured,
                Ok(Ok(None)) => {
                    if log_allowed() {
                        warn!(camera, "frame retry exhausted; continuing");
                    }
                    if sleep_or_cancel(&token, self.timing.fallback_interval).await {
                        break;
                    }
                    continue;
                }
                Ok(Err(CaptureError::Unavailable(code))) => {
                    if log_allowed() {
                        warn!(camera, error = %code, "camera unavailable");
                    }
                    *self.availability.write() = Availability::offline(code);
                    if sleep_or_cancel(&token, self.timing.fallback_interval).await {
                        break;
                    }
                    continue;
                }
                Ok(Err(CaptureError::Failed(details))) => {
                    if log_allowed() {
                        error!(camera, error = %details, "capture failure");
                    }
                    if sleep_or_cancel(&token, self.timing.fallback_interval).await {
                        break;
                    }
                    continue;
                }
                Err(join) => {
                    if log_allowed() {
                        error!(camera, error = %join, "capture task failed");
                    }
                    if sleep_or_cancel(&token, self.timing.fallback_interval).await {
                        break;
                    }
                    continue;
                }
            };

            let captured_at = Instant::now();
            if let Some(prev) = last_frame_at {
                let delta = captured_at.duration_since(prev).as_secs_f64().max(1e-3);
                fps = Some(smooth(fps, 1.0 / delta, FPS_ALPHA));
            }
            last_frame_at = Some(captured_at);

            {
                let mut availability = self.availability.write();
                if !availability.available {
                    info!(camera, "camera available");
                }
                *availability = Availability::online();
            }
            self.slot.publish(
                Bytes::from(captured.jpeg),
                crate::now_ms(),
                fps,
                captured.temps,
            );

            let listener = self.listener.read().clone();
            if let Some(listener) = listener
                && broadcast_limiter.as_ref().is_none_or(|l| l.check().is_ok())
            {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = listener.frame_published(self.kind, self.status()) => {}
                }
            }
        }
    }
}

/// Clears one pause reason on drop.
pub struct PauseGuard {
    camera: Arc<CameraController>,
    reason: &'static str,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.camera.set_paused(self.reason, false);
    }
}

/// One event per `period`; `None` (never throttled) for a zero period.
fn limiter(period: Duration) -> Option<DefaultDirectRateLimiter> {
    Quota::with_period(period).map(RateLimiter::direct)
}

/// Returns `true` if cancelled before `duration` elapsed.
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        script: Vec<Result<Option<Captured>, CaptureError>>,
        released: Arc<AtomicU32>,
    }

    impl FrameSource for Scripted {
        fn capture(&mut self) -> Result<Option<Captured>, CaptureError> {
            if self.script.is_empty() {
                return Ok(Some(Captured {
                    jpeg: vec![0xFF, 0xD8],
                    temps: None,
                }));
            }
            self.script.remove(0)
        }

        fn shutdown(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(CameraKind, u64)>>,
    }

    #[async_trait]
    impl FrameListener for Recorder {
        async fn frame_published(&self, kind: CameraKind, status: CameraStatus) {
            self.seen.lock().push((kind, status.frame_id));
        }
    }

    fn timing() -> LoopTiming {
        LoopTiming {
            capture_interval: Duration::from_millis(5),
            fallback_interval: Duration::from_millis(5),
            error_log_interval: Duration::from_secs(10),
            broadcast_interval: Duration::ZERO,
        }
    }

    fn camera(
        script: Vec<Result<Option<Captured>, CaptureError>>,
    ) -> (Arc<CameraController>, Arc<AtomicU32>) {
        let released = Arc::new(AtomicU32::new(0));
        let source = Scripted {
            script,
            released: released.clone(),
        };
        let cam = CameraController::new(
            CameraKind::Webcam,
            timing(),
            "/webcam.mjpeg",
            8081,
            Availability {
                available: false,
                error: None,
            },
            Some(Box::new(source)),
        );
        (Arc::new(cam), released)
    }

    #[tokio::test]
    async fn frames_arrive_with_increasing_ids() {
        let (cam, released) = camera(vec![]);
        cam.start();
        cam.start();
        let first = cam.wait_for_frame(0, Duration::from_secs(2)).await.unwrap();
        let second = cam
            .wait_for_frame(first.id, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(second.id > first.id);
        assert!(first.fps.is_none());
        assert!(cam.status().available);
        cam.stop().await;
        cam.stop().await;
        assert!(!cam.is_running());
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_then_recovers() {
        let (cam, _) = camera(vec![
            Err(CaptureError::Unavailable("webcam_open_failed:/dev/video0".into())),
            Ok(None),
            Err(CaptureError::Failed("boom".into())),
        ]);
        cam.start();
        let frame = cam.wait_for_frame(0, Duration::from_secs(2)).await.unwrap();
        assert_eq!(frame.id, 1);
        let status = cam.status();
        assert!(status.available);
        assert!(status.error.is_none());
        cam.stop().await;
    }

    #[tokio::test]
    async fn paused_camera_does_not_capture() {
        let (cam, _) = camera(vec![]);
        let guard = cam.pause("rig_base_move");
        assert!(cam.is_paused());
        cam.start();
        assert!(cam.wait_for_frame(0, Duration::from_millis(50)).await.is_none());
        drop(guard);
        assert!(!cam.is_paused());
        assert!(cam.wait_for_frame(0, Duration::from_secs(2)).await.is_some());
        cam.stop().await;
    }

    #[tokio::test]
    async fn listener_sees_published_frames() {
        let (cam, _) = camera(vec![]);
        let recorder = Arc::new(Recorder::default());
        cam.set_listener(recorder.clone());
        cam.start();
        let frame = cam.wait_for_frame(1, Duration::from_secs(2)).await.unwrap();
        cam.stop().await;
        let seen = recorder.seen.lock().clone();
        assert!(seen.len() as u64 >= frame.id - 1);
        assert!(seen.iter().all(|(kind, _)| *kind == CameraKind::Webcam));
    }

    struct Slow {
        delay: Duration,
    }

    impl FrameSource for Slow {
        fn capture(&mut self) -> Result<Option<Captured>, CaptureError> {
            std::thread::sleep(self.delay);
            Ok(Some(Captured {
                jpeg: vec![0xFF, 0xD8],
                temps: None,
            }))
        }
    }

    struct Stalled;

    #[async_trait]
    impl FrameListener for Stalled {
        async fn frame_published(&self, _kind: CameraKind, _status: CameraStatus) {
            std::future::pending::<()>().await;
        }
    }

    fn slow_camera(delay: Duration) -> Arc<CameraController> {
        Arc::new(CameraController::new(
            CameraKind::Thermal,
            timing(),
            "/thermal.mjpeg",
            8081,
            Availability::online(),
            Some(Box::new(Slow { delay })),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_returns_when_capture_outlasts_interval() {
        let cam = slow_camera(Duration::from_millis(20));
        cam.start();
        let frame = cam.wait_for_frame(0, Duration::from_secs(2)).await.unwrap();
        cam.wait_for_frame(frame.id, Duration::from_secs(2))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(3), cam.stop())
            .await
            .expect("stop finishes while captures are back to back");
        assert!(!cam.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_returns_with_stalled_listener() {
        let cam = slow_camera(Duration::from_millis(1));
        cam.set_listener(Arc::new(Stalled));
        cam.start();
        cam.wait_for_frame(0, Duration::from_secs(2)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(3), cam.stop())
            .await
            .expect("stop finishes while the listener never returns");
    }

    #[tokio::test]
    async fn camera_without_source_never_starts() {
        let cam = Arc::new(CameraController::thermal(
            &ThermalConfig::default(),
            8081,
            Err(HalError::NotAttached("i2c-1".into())),
        ));
        cam.start();
        assert!(!cam.is_running());
        let status = cam.status();
        assert!(!status.available);
        assert_eq!(status.frame_id, 0);
        assert!(status.fps.is_none() && status.updated_at_ms.is_none());
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("maxTempC").unwrap().is_null());
        assert_eq!(json["streamPath"], "/thermal.mjpeg");
    }

    #[test]
    fn encodes_jpeg_magic() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&img, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
