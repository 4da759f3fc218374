//! Camera-side driver traits: the thermal array sensor and the webcam.

use crate::HalError;

/// A raw RGB24 frame from a video device.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB24, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

/// A low-resolution thermopile array (e.g. 32×24).
pub trait ThermalSensor: Send {
    /// Grid size as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Fill `out` (row-major, `width * height` entries) with temperatures in
    /// degrees Celsius.
    ///
    /// # Errors
    ///
    /// [`HalError::Transient`] for a corrupt subpage and
    /// [`HalError::TooManyRetries`] when the driver's own retries ran out;
    /// both are worth retrying. Anything else is a real fault.
    fn read_frame(&mut self, out: &mut [f32]) -> Result<(), HalError>;
}

/// A V4L2-style capture device that may be opened and released repeatedly.
pub trait VideoDevice: Send {
    /// Device node, used in error strings.
    fn path(&self) -> String;

    fn is_open(&self) -> bool;

    /// Open (or reopen) the device.
    fn open(&mut self) -> Result<(), HalError>;

    /// Grab the next frame.
    fn read(&mut self) -> Result<CameraFrame, HalError>;

    /// Close the device; the next capture reopens it.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shape_check() {
        let frame = CameraFrame {
            width: 2,
            height: 2,
            data: vec![0u8; 12],
        };
        assert!(frame.is_well_formed());

        let short = CameraFrame {
            width: 2,
            height: 2,
            data: vec![0u8; 11],
        };
        assert!(!short.is_well_formed());
    }
}
