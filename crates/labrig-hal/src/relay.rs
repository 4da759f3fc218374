//! `StirrerLine` trait for the GPIO output that powers the magnetic stirrer.

use crate::HalError;

/// A single digital output line.
pub trait StirrerLine: Send {
    /// Drive the line high (`true`) or low.
    ///
    /// # Errors
    ///
    /// Returns [`HalError::Io`] if the GPIO write fails.
    fn set_level(&mut self, high: bool) -> Result<(), HalError>;

    /// Last level written.
    fn level(&self) -> bool;
}
