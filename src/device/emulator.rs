// SPDX-License-Identifier: MIT
use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use super::{DeviceConnector, DeviceDriver};
use crate::config::DeviceProfile;
use crate::error::DeviceError;

const ECHO_AMPLITUDE: f64 = 0.03;
const ECHO_WIDTH_M: f64 = 0.08;
const CARRIER_CYCLES_PER_M: f64 = 12.0;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Software stand-in for a radar module: emits a single moving echo at the
/// configured frame rate.
pub struct EmulatedRadar {
    device_id: String,
    profile: Option<DeviceProfile>,
    phase: f64,
    frame_index: u64,
    next_deadline: Option<Instant>,
    open: bool,
}

impl EmulatedRadar {
    #[must_use]
    pub fn new(device_id: &str) -> Self {
        // Spread devices apart so their echoes are distinguishable.
        let phase = device_id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        Self {
            device_id: device_id.to_string(),
            profile: None,
            phase: f64::from(phase % 360).to_radians(),
            frame_index: 0,
            next_deadline: None,
            open: true,
        }
    }

    fn synthesize(&self, profile: &DeviceProfile) -> Vec<f64> {
        let start = f64::from(profile.frame_area_start);
        let span = f64::from(profile.frame_area_end) - start;
        #[allow(clippy::cast_precision_loss)]
        let t = self.frame_index as f64;
        let target = start + span * (0.5 + 0.3 * (t * 0.05 + self.phase).sin());

        #[allow(clippy::cast_precision_loss)]
        let bin_width = span / profile.sample_count as f64;
        (0..profile.sample_count)
            .map(|bin| {
                #[allow(clippy::cast_precision_loss)]
                let range = start + bin_width * bin as f64;
                let offset = range - target;
                let envelope = (-(offset * offset) / (ECHO_WIDTH_M * ECHO_WIDTH_M)).exp();
                ECHO_AMPLITUDE * envelope * (TAU * CARRIER_CYCLES_PER_M * offset + self.phase).cos()
            })
            .collect()
    }
}

impl DeviceDriver for EmulatedRadar {
    fn reset(&mut self) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Reset(format!("{} is closed", self.device_id)));
        }
        debug!("emulator {}: reset", self.device_id);
        self.profile = None;
        self.frame_index = 0;
        self.next_deadline = None;
        Ok(())
    }

    fn configure(&mut self, profile: &DeviceProfile) -> Result<(), DeviceError> {
        profile
            .validate()
            .map_err(|e| DeviceError::Configure(e.to_string()))?;
        self.profile = Some(profile.clone());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Vec<f64>, DeviceError> {
        let Some(profile) = self.profile.as_ref() else {
            return Err(DeviceError::Read("device is not configured".to_string()));
        };

        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now + READ_TIMEOUT {
            thread::sleep(READ_TIMEOUT);
            return Err(DeviceError::Timeout);
        }
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + profile.frame_period());

        let samples = self.synthesize(profile);
        self.frame_index += 1;
        Ok(samples)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::Close(format!("{} is already closed", self.device_id)));
        }
        debug!("emulator {}: closed after {} frames", self.device_id, self.frame_index);
        self.open = false;
        self.profile = None;
        Ok(())
    }
}

pub struct EmulatorConnector;

impl DeviceConnector for EmulatorConnector {
    fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceDriver>, DeviceError> {
        if device_id.trim().is_empty() {
            return Err(DeviceError::Connect("blank device id".to_string()));
        }
        Ok(Box::new(EmulatedRadar::new(device_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_profile() -> DeviceProfile {
        DeviceProfile {
            fps: 100,
            sample_count: 32,
            ..DeviceProfile::default()
        }
    }

    #[test]
    fn read_before_configure_fails() {
        let mut radar = EmulatedRadar::new("A");
        assert!(matches!(radar.read_frame(), Err(DeviceError::Read(_))));
    }

    #[test]
    fn frames_have_profile_length_and_bounded_amplitude() {
        let mut radar = EmulatedRadar::new("A");
        radar.reset().unwrap();
        radar.configure(&fast_profile()).unwrap();

        for _ in 0..3 {
            let frame = radar.read_frame().unwrap();
            assert_eq!(frame.len(), 32);
            assert!(frame.iter().all(|s| s.abs() <= ECHO_AMPLITUDE));
        }
    }

    #[test]
    fn reads_are_paced_at_frame_rate() {
        let mut radar = EmulatedRadar::new("A");
        radar.configure(&fast_profile()).unwrap();

        let start = Instant::now();
        for _ in 0..4 {
            radar.read_frame().unwrap();
        }
        // First read is immediate, the next three wait one period each.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn reset_clears_configuration() {
        let mut radar = EmulatedRadar::new("A");
        radar.configure(&fast_profile()).unwrap();
        radar.reset().unwrap();
        assert!(radar.read_frame().is_err());
    }

    #[test]
    fn slow_frame_rate_times_out_instead_of_blocking() {
        let mut radar = EmulatedRadar::new("A");
        radar
            .configure(&DeviceProfile {
                fps: 1,
                sample_count: 8,
                ..DeviceProfile::default()
            })
            .unwrap();

        assert_eq!(radar.read_frame().unwrap().len(), 8);
        let started = Instant::now();
        assert_eq!(radar.read_frame(), Err(DeviceError::Timeout));
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn closed_device_refuses_reset_and_second_close() {
        let mut radar = EmulatedRadar::new("A");
        radar.close().unwrap();
        assert!(matches!(radar.reset(), Err(DeviceError::Reset(_))));
        assert!(matches!(radar.close(), Err(DeviceError::Close(_))));
        assert!(matches!(radar.read_frame(), Err(DeviceError::Read(_))));
    }

    #[test]
    fn connector_rejects_blank_ids() {
        assert!(EmulatorConnector.connect("A").is_ok());
        assert!(matches!(
            EmulatorConnector.connect("  "),
            Err(DeviceError::Connect(_))
        ));
    }

    #[test]
    fn invalid_profile_is_rejected() {
        let mut radar = EmulatedRadar::new("A");
        let profile = DeviceProfile {
            fps: 0,
            ..DeviceProfile::default()
        };
        assert!(matches!(
            radar.configure(&profile),
            Err(DeviceError::Configure(_))
        ));
    }
}
