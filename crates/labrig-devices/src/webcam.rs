//! Webcam [`FrameSource`]: lazy (re)open, grab, JPEG encode.

use image::RgbImage;
use labrig_hal::VideoDevice;
use tracing::{debug, warn};

use crate::camera::{CaptureError, Captured, FrameSource, encode_jpeg};

pub struct WebcamPipeline {
    quality: u8,
    device: Box<dyn VideoDevice>,
}

impl WebcamPipeline {
    pub fn new(quality: u8, device: Box<dyn VideoDevice>) -> Self {
        Self { quality, device }
    }

    fn ensure_open(&mut self) -> Result<(), CaptureError> {
        if self.device.is_open() {
            return Ok(());
        }
        self.device.release();
        let path = self.device.path();
        self.device.open().map_err(|e| {
            debug!(path, error = %e, "webcam open failed");
            CaptureError::Unavailable(format!("webcam_open_failed:{path}"))
        })
    }
}

impl FrameSource for WebcamPipeline {
    fn capture(&mut self) -> Result<Option<Captured>, CaptureError> {
        self.ensure_open()?;
        let frame = match self.device.read() {
            Ok(frame) if frame.is_well_formed() => frame,
            Ok(_) | Err(_) => {
                self.device.release();
                return Err(CaptureError::Unavailable("webcam_read_failed".to_string()));
            }
        };
        let image = RgbImage::from_raw(frame.width, frame.height, frame.data)
            .ok_or_else(|| CaptureError::Unavailable("webcam_encode_failed".to_string()))?;
        let jpeg = encode_jpeg(&image, self.quality).map_err(|e| {
            warn!(error = %e, "webcam encode failed");
            CaptureError::Unavailable("webcam_encode_failed".to_string())
        })?;
        Ok(Some(Captured { jpeg, temps: None }))
    }

    fn shutdown(&mut self) {
        self.device.release();
    }
}
