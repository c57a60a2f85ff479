// SPDX-License-Identifier: MIT
pub mod format;
pub mod reader;
pub mod writer;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{info, warn};

use crate::codec::Frame;
use crate::error::StreamError;
use format::{EXTENSION, SessionMetadata};
use writer::RecordingWriter;

/// Frames captured during one session, in arrival order.
#[derive(Clone, Debug)]
pub struct Recording {
    metadata: SessionMetadata,
    frames: Vec<Frame>,
}

impl Recording {
    #[must_use]
    pub fn new(metadata: SessionMetadata) -> Self {
        Self {
            metadata,
            frames: Vec::new(),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Durable home for finished recordings.
pub trait RecordingStore: Send + Sync {
    /// Persists every frame of `recording` or fails; never a partial artifact.
    /// Returns an identifier for the stored artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Persistence`] if the artifact could not be written.
    fn save(
        &self,
        device_id: &str,
        recording: &Recording,
        at: DateTime<Local>,
    ) -> Result<String, StreamError>;
}

/// `<HH>-<MM>-<SS>-<device>.rrec`. Characters that cannot appear in a file
/// name are replaced, so serial port paths still produce a flat name.
#[must_use]
pub fn artifact_name(device_id: &str, at: DateTime<Local>) -> String {
    let device: String = device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{device}.{EXTENSION}", at.format("%H-%M-%S"))
}

/// Writes recordings as files in one directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create recordings directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn write_file(path: &Path, recording: &Recording) -> Result<()> {
        let mut writer = RecordingWriter::create(path, recording.metadata())?;
        for frame in recording.frames() {
            writer.write_frame(frame)?;
        }
        writer.finish()
    }
}

impl RecordingStore for FileStore {
    fn save(
        &self,
        device_id: &str,
        recording: &Recording,
        at: DateTime<Local>,
    ) -> Result<String, StreamError> {
        let path = self.dir.join(artifact_name(device_id, at));
        let partial = path.with_extension(format!("{EXTENSION}.partial"));

        let result = Self::write_file(&partial, recording).and_then(|()| {
            fs::rename(&partial, &path).with_context(|| {
                format!("failed to move recording into place: {}", path.display())
            })
        });

        if let Err(e) = result {
            if partial.exists()
                && let Err(rm) = fs::remove_file(&partial)
            {
                warn!("failed to remove {}: {rm}", partial.display());
            }
            return Err(StreamError::Persistence {
                device: device_id.to_string(),
                reason: format!("{e:#}"),
            });
        }

        info!(
            "{device_id}: saved {} frames to {}",
            recording.len(),
            path.display()
        );
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use chrono::TimeZone;

    use super::*;
    use crate::config::DeviceProfile;
    use crate::recording::reader::{RecordingReader, ReplaySource};

    fn make_metadata() -> SessionMetadata {
        SessionMetadata {
            device_id: "A".to_string(),
            profile: DeviceProfile {
                sample_count: 3,
                ..DeviceProfile::default()
            },
            session_start: SystemTime::UNIX_EPOCH,
        }
    }

    fn make_frame(index: u32) -> Frame {
        let i = f64::from(index);
        Frame::new(vec![i, -i * 0.5, 0.25], 1_700_000_000.0 + i * 0.05)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, h, m, s).unwrap()
    }

    #[test]
    fn artifact_name_is_zero_padded_and_flat() {
        assert_eq!(artifact_name("A", at(7, 5, 3)), "07-05-03-A.rrec");
        assert_eq!(
            artifact_name("/dev/ttyACM0", at(23, 59, 59)),
            "23-59-59-_dev_ttyACM0.rrec"
        );
    }

    #[test]
    fn save_then_read_back_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let mut recording = Recording::new(make_metadata());
        for i in 0..5 {
            recording.push(make_frame(i));
        }

        let id = store.save("A", &recording, at(12, 0, 1)).unwrap();
        assert!(id.ends_with("12-00-01-A.rrec"));

        let reader = RecordingReader::open(Path::new(&id)).unwrap();
        assert_eq!(reader.metadata(), recording.metadata());
        assert_eq!(reader.frames(), recording.frames());
        assert!(reader.frames().get(5).is_none());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn empty_recording_is_still_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let recording = Recording::new(make_metadata());
        let id = store.save("A", &recording, at(1, 2, 3)).unwrap();

        let reader = RecordingReader::open(Path::new(&id)).unwrap();
        assert_eq!(reader.frame_count(), 0);
    }

    #[test]
    fn unwritable_directory_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("recordings")).unwrap();
        fs::remove_dir(dir.path().join("recordings")).unwrap();

        let recording = Recording::new(make_metadata());
        let err = store.save("A", &recording, at(1, 2, 3)).unwrap_err();
        assert!(matches!(err, StreamError::Persistence { ref device, .. } if device == "A"));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.rrec");
        let mut writer = RecordingWriter::create(&path, &make_metadata()).unwrap();
        writer.write_frame(&make_frame(0)).unwrap();
        drop(writer);

        assert!(RecordingReader::open(&path).is_err());
    }

    #[test]
    fn replay_emits_frames_in_order_with_recorded_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let mut recording = Recording::new(make_metadata());
        for i in 0..3 {
            recording.push(make_frame(i));
        }
        let id = store.save("A", &recording, at(4, 5, 6)).unwrap();

        let reader = RecordingReader::open(Path::new(&id)).unwrap();
        let mut replay = ReplaySource::new(reader, 10.0);
        assert_eq!(replay.next_gap(), std::time::Duration::ZERO);

        let mut replayed = Vec::new();
        while !replay.is_finished() {
            if let Some(frame) = replay.next_frame() {
                replayed.push(frame);
            } else {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        assert_eq!(replayed, recording.frames());
    }
}
