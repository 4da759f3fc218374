//! Latest-frame slot shared between a capture loop and its readers.
//!
//! Readers never queue: a slow MJPEG client simply skips the frames it was
//! too slow to see.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;

/// Weight given to the newest instantaneous FPS sample.
pub const FPS_ALPHA: f64 = 0.2;

/// Exponential moving average; the first sample is taken as-is.
pub fn smooth(previous: Option<f64>, instant: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => alpha * instant + (1.0 - alpha) * prev,
        None => instant,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempRange {
    pub min_c: f64,
    pub max_c: f64,
}

/// An encoded frame plus the metadata published with it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Strictly increasing per camera; 0 means nothing has been captured.
    pub id: u64,
    pub jpeg: Bytes,
    pub updated_at_ms: i64,
    pub fps: Option<f64>,
    pub temps: Option<TempRange>,
}

pub struct FrameSlot {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Store a new frame, assigning it the next id. Wakes every waiter.
    ///
    /// Only the owning capture loop publishes.
    pub fn publish(
        &self,
        jpeg: Bytes,
        updated_at_ms: i64,
        fps: Option<f64>,
        temps: Option<TempRange>,
    ) -> Arc<Frame> {
        let frame = Arc::new(Frame {
            id: self.frame_id() + 1,
            jpeg,
            updated_at_ms,
            fps,
            temps,
        });
        self.tx.send_replace(Some(frame.clone()));
        frame
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }

    pub fn frame_id(&self) -> u64 {
        self.tx.borrow().as_ref().map_or(0, |f| f.id)
    }

    /// Wait until a frame newer than `last_id` exists, or `timeout` passes.
    pub async fn wait_for_frame(&self, last_id: u64, timeout: Duration) -> Option<Arc<Frame>> {
        let mut rx = self.tx.subscribe();
        let newer = |slot: &Option<Arc<Frame>>| slot.as_ref().is_some_and(|f| f.id > last_id);
        match tokio::time::timeout(timeout, rx.wait_for(newer)).await {
            Ok(Ok(slot)) => slot.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_seeds_then_blends() {
        let first = smooth(None, 10.0, FPS_ALPHA);
        assert_eq!(first, 10.0);
        let second = smooth(Some(first), 20.0, FPS_ALPHA);
        assert!((second - 12.0).abs() < 1e-9);
    }

    #[test]
    fn ids_increase_from_one() {
        let slot = FrameSlot::new();
        assert_eq!(slot.frame_id(), 0);
        assert!(slot.latest().is_none());
        let a = slot.publish(Bytes::from_static(b"a"), 1, None, None);
        let b = slot.publish(Bytes::from_static(b"b"), 2, Some(8.0), None);
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(slot.latest().unwrap().jpeg, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_newer_exists() {
        let slot = FrameSlot::new();
        slot.publish(Bytes::from_static(b"x"), 1, None, None);
        let frame = slot.wait_for_frame(0, Duration::from_millis(10)).await;
        assert_eq!(frame.unwrap().id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_new_frame() {
        let slot = FrameSlot::new();
        slot.publish(Bytes::from_static(b"x"), 1, None, None);
        assert!(slot.wait_for_frame(1, Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn waiter_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait_for_frame(0, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        slot.publish(Bytes::from_static(b"y"), 3, None, None);
        let frame = waiter.await.unwrap().unwrap();
        assert_eq!(frame.updated_at_ms, 3);
    }
}
