// SPDX-License-Identifier: MIT
//! Driver adapter boundary. The pipeline only ever talks to a device through
//! these traits; vendor SDK bindings live behind them.
pub mod emulator;

use crate::config::DeviceProfile;
use crate::error::DeviceError;

pub trait DeviceDriver: Send {
    /// Soft-resets the module into a known state.
    ///
    /// # Errors
    ///
    /// Returns an error if the module does not acknowledge the reset.
    fn reset(&mut self) -> Result<(), DeviceError>;

    /// # Errors
    ///
    /// Returns an error if any acquisition parameter is rejected.
    fn configure(&mut self, profile: &DeviceProfile) -> Result<(), DeviceError>;

    /// Blocks until the next frame is available and returns its samples.
    ///
    /// Return [`DeviceError::Timeout`] when no frame arrived within the
    /// driver's read timeout. It is not a failure: the caller checks for a
    /// stop request and reads again. Any other error ends acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read_frame(&mut self) -> Result<Vec<f64>, DeviceError>;

    /// # Errors
    ///
    /// Returns an error if the handle could not be released cleanly.
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Opens driver handles by device identifier.
pub trait DeviceConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if no device answers to `device_id`.
    fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceDriver>, DeviceError>;
}
