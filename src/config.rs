// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DISPLAY_DEPTH: usize = 64;

/// Acquisition parameters applied to every device of a fleet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub dac_min: u32,
    pub dac_max: u32,
    pub iterations: u32,
    pub pulses_per_step: u32,
    pub tx_center_frequency: u8,
    /// Active range window in metres.
    pub frame_area_start: f32,
    pub frame_area_end: f32,
    pub fps: u32,
    /// Range bins per frame for this device profile.
    pub sample_count: usize,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            dac_min: 900,
            dac_max: 1150,
            iterations: 16,
            pulses_per_step: 26,
            tx_center_frequency: 4,
            frame_area_start: 0.0,
            frame_area_end: 2.0,
            fps: 20,
            sample_count: 312,
        }
    }
}

impl DeviceProfile {
    /// Reads a profile from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profile: {}", path.display()))?;
        let profile: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse profile: {}", path.display()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// # Errors
    ///
    /// Returns an error describing the first inconsistent parameter.
    pub fn validate(&self) -> Result<()> {
        if self.dac_min > self.dac_max {
            bail!("dac_min {} exceeds dac_max {}", self.dac_min, self.dac_max);
        }
        if self.frame_area_start >= self.frame_area_end {
            bail!(
                "frame area start {} must be below end {}",
                self.frame_area_start,
                self.frame_area_end
            );
        }
        if self.fps == 0 {
            bail!("fps must be positive");
        }
        if self.sample_count == 0 {
            bail!("sample_count must be positive");
        }
        Ok(())
    }

    #[must_use]
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }
}

/// Everything a fleet controller needs to know up front.
#[derive(Clone, Debug)]
pub struct FleetConfig {
    pub devices: Vec<String>,
    pub profile: DeviceProfile,
    pub output_dir: PathBuf,
    pub display_depth: usize,
}

impl FleetConfig {
    #[must_use]
    pub fn new(devices: Vec<String>, output_dir: PathBuf) -> Self {
        Self {
            devices,
            profile: DeviceProfile::default(),
            output_dir,
            display_depth: DEFAULT_DISPLAY_DEPTH,
        }
    }

    /// # Errors
    ///
    /// Returns an error for an empty, blank, or duplicated device identifier,
    /// a zero display depth, or an invalid profile.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.trim().is_empty() {
                bail!("device identifiers must not be blank");
            }
            if !seen.insert(device.as_str()) {
                bail!("device identifier {device} is listed twice");
            }
        }
        if self.display_depth == 0 {
            bail!("display queue depth must be positive");
        }
        self.profile.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        let profile = DeviceProfile::default();
        profile.validate().unwrap();
        assert_eq!(profile.sample_count, 312);
        assert_eq!(profile.frame_period(), Duration::from_millis(50));
    }

    #[test]
    fn inconsistent_profiles_are_rejected() {
        let bad = [
            DeviceProfile {
                dac_min: 1200,
                ..DeviceProfile::default()
            },
            DeviceProfile {
                frame_area_end: 0.0,
                ..DeviceProfile::default()
            },
            DeviceProfile {
                fps: 0,
                ..DeviceProfile::default()
            },
            DeviceProfile {
                sample_count: 0,
                ..DeviceProfile::default()
            },
        ];
        for profile in bad {
            assert!(profile.validate().is_err(), "{profile:?}");
        }
    }

    #[test]
    fn profile_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, r#"{"fps": 10, "sample_count": 64}"#).unwrap();

        let profile = DeviceProfile::load(&path).unwrap();
        assert_eq!(profile.fps, 10);
        assert_eq!(profile.sample_count, 64);
        assert_eq!(profile.dac_max, 1150);
    }

    #[test]
    fn duplicate_devices_are_rejected() {
        let config = FleetConfig::new(
            vec!["A".to_string(), "B".to_string(), "A".to_string()],
            PathBuf::from("."),
        );
        assert!(config.validate().is_err());

        let config = FleetConfig::new(vec![" ".to_string()], PathBuf::from("."));
        assert!(config.validate().is_err());

        let config = FleetConfig::new(vec!["A".to_string()], PathBuf::from("."));
        config.validate().unwrap();
    }
}
