// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use super::format::{EOF_MARKER, FORMAT_VERSION, FileHeader, MAGIC, SessionMetadata};
use crate::codec::Frame;

pub struct RecordingReader {
    metadata: SessionMetadata,
    frames: Vec<Frame>,
}

impl RecordingReader {
    /// Opens a recording file, validates the header, and reads all frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, the header is invalid,
    /// or frame data is corrupted.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open recording file: {}", path.display()))?;
        let mut decoder =
            zstd::Decoder::new(BufReader::new(file)).context("failed to create zstd decoder")?;

        let header = Self::read_header(&mut decoder)?;

        if header.magic != MAGIC {
            bail!("invalid magic bytes in recording file");
        }
        if header.format_version != FORMAT_VERSION {
            bail!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                header.format_version
            );
        }

        let frames = Self::read_all_frames(&mut decoder)?;

        Ok(Self {
            metadata: header.metadata,
            frames,
        })
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
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_header(reader: &mut impl Read) -> Result<FileHeader> {
        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .context("failed to read header length")?;
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut data = vec![0u8; len];
        reader
            .read_exact(&mut data)
            .context("failed to read header data")?;

        postcard::from_bytes(&data).context("failed to deserialize file header")
    }

    fn read_all_frames(reader: &mut impl Read) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut len_buf = [0u8; 4];

        loop {
            reader
                .read_exact(&mut len_buf)
                .context("recording is truncated: missing EOF marker")?;

            if len_buf == EOF_MARKER {
                break;
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            reader
                .read_exact(&mut data)
                .context("failed to read frame data")?;

            let frame: Frame =
                postcard::from_bytes(&data).context("failed to deserialize frame")?;
            frames.push(frame);
        }

        Ok(frames)
    }
}

/// Plays a recording back at the pace it was captured, scaled by `speed`.
pub struct ReplaySource {
    reader: RecordingReader,
    current_index: usize,
    playback_speed: f64,
    last_emitted: Option<Instant>,
}

impl ReplaySource {
    #[must_use]
    pub fn new(reader: RecordingReader, speed: f64) -> Self {
        Self {
            reader,
            current_index: 0,
            playback_speed: if speed > 0.0 { speed } else { 1.0 },
            last_emitted: None,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        self.reader.metadata()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_index >= self.reader.frame_count()
    }

    /// Wall-clock wait before the next frame is due, as recorded.
    #[must_use]
    pub fn next_gap(&self) -> Duration {
        let frames = self.reader.frames();
        let (Some(prev), Some(next)) = (
            self.current_index
                .checked_sub(1)
                .and_then(|i| frames.get(i)),
            frames.get(self.current_index),
        ) else {
            return Duration::ZERO;
        };
        let gap = (next.timestamp - prev.timestamp).max(0.0) / self.playback_speed;
        Duration::try_from_secs_f64(gap).unwrap_or(Duration::ZERO)
    }

    /// Returns the next frame once its gap has elapsed, `None` otherwise.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.reader.frames().get(self.current_index)?;
        if let Some(last) = self.last_emitted
            && last.elapsed() < self.next_gap()
        {
            return None;
        }

        let frame = frame.clone();
        self.current_index += 1;
        self.last_emitted = Some(Instant::now());
        Some(frame)
    }
}
