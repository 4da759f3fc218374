//! `PwmChannel` trait for the hobby servos on the rig's PWM driver board.
//!
//! One channel turns the dropper carousel (the base); the rest drive pinch
//! valves. Both are plain angle-commanded servos at this layer; snapping to
//! legal positions happens in the rig controller.

use crate::HalError;

/// One output of a multi-channel PWM servo driver.
pub trait PwmChannel: Send {
    /// Board channel index.
    fn channel(&self) -> usize;

    /// Drive the servo to `angle_deg`.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Io`] if the I2C write fails.
    fn set_angle(&mut self, angle_deg: f64) -> Result<(), HalError>;

    /// Angle implied by the current duty cycle, or `None` when the output
    /// has never been driven since power-up.
    fn angle(&self) -> Option<f64>;
}
