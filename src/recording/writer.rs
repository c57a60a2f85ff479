// SPDX-License-Identifier: MIT
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use super::format::{EOF_MARKER, FORMAT_VERSION, FileHeader, MAGIC, SessionMetadata};
use crate::codec::Frame;

pub struct RecordingWriter {
    encoder: zstd::Encoder<'static, BufWriter<File>>,
}

impl RecordingWriter {
    /// Creates a new recording file at `path` and writes the file header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header cannot be written.
    pub fn create(path: &Path, metadata: &SessionMetadata) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create recording file: {}", path.display()))?;
        let encoder = zstd::Encoder::new(BufWriter::new(file), 3)
            .context("failed to create zstd encoder")?;

        let mut writer = Self { encoder };
        writer
            .write_record(&FileHeader {
                magic: MAGIC,
                format_version: FORMAT_VERSION,
                metadata: metadata.clone(),
            })
            .context("failed to write file header")?;
        Ok(writer)
    }

    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_record(frame).context("failed to write frame")
    }

    fn write_record(&mut self, record: &impl Serialize) -> Result<()> {
        let serialized = postcard::to_stdvec(record).context("failed to serialize record")?;
        let len = u32::try_from(serialized.len()).context("record exceeds 4 GiB")?;
        self.encoder.write_all(&len.to_le_bytes())?;
        self.encoder.write_all(&serialized)?;
        Ok(())
    }

    /// Writes the EOF marker, finishes compression, and syncs the file.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub fn finish(mut self) -> Result<()> {
        self.encoder
            .write_all(&EOF_MARKER)
            .context("failed to write EOF marker")?;
        let mut buf_writer = self
            .encoder
            .finish()
            .context("failed to finish zstd encoder")?;
        buf_writer
            .flush()
            .context("failed to flush recording file")?;
        buf_writer
            .get_ref()
            .sync_all()
            .context("failed to sync recording file")?;
        Ok(())
    }
}
