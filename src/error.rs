// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failures reported by a device driver adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("failed to connect to device {0}")]
    Connect(String),

    #[error("device reset failed: {0}")]
    Reset(String),

    #[error("device rejected configuration: {0}")]
    Configure(String),

    #[error("frame read failed: {0}")]
    Read(String),

    /// No frame became available within the driver's read timeout.
    #[error("no frame within read timeout")]
    Timeout,

    #[error("frame has {actual} samples, profile expects {expected}")]
    FrameLength { expected: usize, actual: usize },

    #[error("frame cannot be encoded: {0}")]
    Unencodable(#[source] CodecError),

    #[error("device close failed: {0}")]
    Close(String),
}

/// Failures reported by a broker transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("channel {0} is closed")]
    ChannelClosed(String),

    #[error("failed to close connection: {0}")]
    Close(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed frame message: {0}")]
    Malformed(String),

    #[error("frame message has no timestamp")]
    Empty,

    #[error("value {index} is not a finite number")]
    NonFinite { index: usize },
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Malformed(e.to_string())
    }
}

/// Per-device pipeline failures. None of these ever crosses into another
/// device's pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("device {device}: configuration failed: {source}")]
    DeviceConfiguration { device: String, source: DeviceError },

    #[error("device {device}: acquisition failed: {source}")]
    Acquisition { device: String, source: DeviceError },

    #[error("device {device}: publish failed: {source}")]
    Publish { device: String, source: BrokerError },

    #[error("device {device}: subscribe failed: {source}")]
    Subscribe { device: String, source: BrokerError },

    #[error("device {device}: failed to persist recording: {reason}")]
    Persistence { device: String, reason: String },

    /// Non-fatal: the session stop still completes.
    #[error("device {device}: connection close failed: {source}")]
    Shutdown { device: String, source: BrokerError },

    #[error("device {0} is already running")]
    AlreadyRunning(String),

    #[error("device {0} is not running")]
    NotRunning(String),

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("device {device}: failed to spawn {worker} thread: {reason}")]
    Spawn {
        device: String,
        worker: &'static str,
        reason: String,
    },

    #[error("device {device}: {worker} thread panicked")]
    WorkerPanicked { device: String, worker: &'static str },
}

impl StreamError {
    #[must_use]
    pub fn device(&self) -> &str {
        match self {
            StreamError::DeviceConfiguration { device, .. }
            | StreamError::Acquisition { device, .. }
            | StreamError::Publish { device, .. }
            | StreamError::Subscribe { device, .. }
            | StreamError::Persistence { device, .. }
            | StreamError::Shutdown { device, .. }
            | StreamError::Spawn { device, .. }
            | StreamError::WorkerPanicked { device, .. }
            | StreamError::AlreadyRunning(device)
            | StreamError::NotRunning(device)
            | StreamError::UnknownDevice(device) => device,
        }
    }
}
