// SPDX-License-Identifier: MIT
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::DeviceProfile;

pub const MAGIC: [u8; 4] = *b"RRLY";
pub const FORMAT_VERSION: u8 = 1;
pub const EOF_MARKER: [u8; 4] = *b"REOF";
pub const EXTENSION: &str = "rrec";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub device_id: String,
    pub profile: DeviceProfile,
    pub session_start: SystemTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub format_version: u8,
    pub metadata: SessionMetadata,
}
