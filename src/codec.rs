// SPDX-License-Identifier: MIT
//! Wire representation of a frame.
//!
//! A message body is a JSON array of numbers: the samples in order, followed
//! by the capture timestamp (seconds since the Unix epoch) as the last
//! element.
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub samples: Vec<f64>,
    pub timestamp: f64,
}

impl Frame {
    #[must_use]
    pub fn new(samples: Vec<f64>, timestamp: f64) -> Self {
        Self { samples, timestamp }
    }

    /// Stamps `samples` with the current wall-clock time.
    #[must_use]
    pub fn stamped(samples: Vec<f64>) -> Self {
        Self::new(samples, wall_clock_seconds())
    }

    /// Index and absolute value of the strongest sample.
    #[must_use]
    pub fn peak(&self) -> Option<(usize, f64)> {
        self.samples
            .iter()
            .map(|s| s.abs())
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[must_use]
pub fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Encodes a frame as `[s0, s1, ..., sN-1, timestamp]`.
///
/// # Errors
///
/// Returns [`CodecError::NonFinite`] for a NaN or infinite value, which JSON
/// cannot carry.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let mut values = Vec::with_capacity(frame.samples.len() + 1);
    values.extend_from_slice(&frame.samples);
    values.push(frame.timestamp);
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(CodecError::NonFinite { index });
    }
    Ok(serde_json::to_vec(&values)?)
}

/// Decodes a message body, splitting the trailing timestamp off the samples.
///
/// # Errors
///
/// Returns an error if the body is not a JSON array of numbers or is empty.
pub fn decode(body: &[u8]) -> Result<Frame, CodecError> {
    let mut values: Vec<f64> = serde_json::from_slice(body)?;
    let timestamp = values.pop().ok_or(CodecError::Empty)?;
    Ok(Frame::new(values, timestamp))
}
