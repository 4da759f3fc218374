//! [`VolumeEstimator`] – low-rate background loop asking a vision model how
//! much liquid is in the flask.
//!
//! Queries only happen inside an enable window opened by dispenses into the
//! sensed dropper, and only while someone is connected to see the answer.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use labrig_devices::CameraController;
use labrig_types::VolumeConfig;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::RigNotifier;
use crate::vision::VolumeModel;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").ok());

/// First decimal number in `text`; negative or non-finite values are
/// rejected.
pub fn parse_volume_from_text(text: &str) -> Option<f64> {
    let value: f64 = NUMBER.as_ref()?.find(text)?.as_str().parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Latest estimate as broadcast to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReading {
    pub model: String,
    pub volume_ml: Option<f64>,
    pub raw: Option<String>,
    pub error: Option<String>,
    pub updated_at_ms: Option<i64>,
}

pub struct VolumeEstimator {
    poll_interval: Duration,
    model: Option<Arc<dyn VolumeModel>>,
    webcam: Arc<CameraController>,
    notifier: Arc<dyn RigNotifier>,
    reading: RwLock<VolumeReading>,
    enabled_until: Mutex<Option<Instant>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl VolumeEstimator {
    /// `model` is `None` when no API key is configured; the estimator then
    /// reports `anthropic_api_key_missing` and never polls.
    pub fn new(
        config: &VolumeConfig,
        model: Option<Arc<dyn VolumeModel>>,
        webcam: Arc<CameraController>,
        notifier: Arc<dyn RigNotifier>,
    ) -> Self {
        let error = if model.is_none() {
            warn!("volume estimation disabled: ANTHROPIC_API_KEY missing");
            Some("anthropic_api_key_missing".to_string())
        } else {
            None
        };
        let name = model
            .as_ref()
            .map_or_else(|| config.model.clone(), |m| m.model_name().to_string());
        Self {
            poll_interval: config.poll_interval(),
            model,
            webcam,
            notifier,
            reading: RwLock::new(VolumeReading {
                model: name,
                volume_ml: None,
                raw: None,
                error,
                updated_at_ms: None,
            }),
            enabled_until: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn reading(&self) -> VolumeReading {
        self.reading.read().clone()
    }

    /// Allow queries for `window` from now. An already later deadline is
    /// kept.
    pub fn enable_for(&self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut until = self.enabled_until.lock();
        *until = Some(until.map_or(deadline, |current| current.max(deadline)));
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled_until
            .lock()
            .is_some_and(|until| Instant::now() <= until)
    }

    /// Run one estimation if every gate is open. Returns whether a query was
    /// made.
    pub async fn poll_once(&self) -> bool {
        let Some(model) = self.model.clone() else {
            return false;
        };
        if !self.is_enabled() || !self.notifier.has_listeners() {
            return false;
        }
        let Some(frame) = self.webcam.latest() else {
            debug!("volume poll skipped: no webcam frame yet");
            return false;
        };

        let outcome = model.estimate(&frame.jpeg).await;
        let reading = {
            let mut reading = self.reading.write();
            reading.updated_at_ms = Some(labrig_devices::now_ms());
            match outcome {
                Ok(text) => {
                    match parse_volume_from_text(&text) {
                        Some(ml) => {
                            reading.volume_ml = Some((ml * 100.0).round() / 100.0);
                            reading.error = None;
                        }
                        None => {
                            reading.volume_ml = None;
                            reading.error = Some("volume_parse_failed".to_string());
                        }
                    }
                    reading.raw = Some(text);
                }
                Err(e) => {
                    warn!(error = %e, "volume estimation failed");
                    reading.volume_ml = None;
                    reading.error = Some(format!("volume_estimation_failed:{e}"));
                }
            }
            reading.clone()
        };
        self.notifier.volume_updated(reading).await;
        true
    }

    /// Spawn the polling loop. Idempotent; does nothing without a model.
    pub fn start(self: &Arc<Self>) {
        if self.model.is_none() {
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, h)| !h.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let this = self.clone();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(this.poll_interval) => {}
                }
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = this.poll_once() => {}
                }
            }
        });
        *task = Some((token, handle));
        info!(interval_s = self.poll_interval.as_secs_f64(), "volume estimator started");
    }

    pub async fn stop(&self) {
        let running = self.task.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            let _ = handle.await;
        }
    }
}
