use anyhow::{anyhow, Result};
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::frame::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::PipelineError;

/// Motion-JPEG file sink: every frame is appended as a standalone JPEG.
///
/// A job that fails midway leaves the frames written so far readable.
pub struct MjpegFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    quality: u8,
    frames: u64,
}

impl MjpegFileSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            PipelineError::Output(format!("create {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            quality: DEFAULT_JPEG_QUALITY,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for MjpegFileSink {
    fn write(&mut self, image: &RgbImage) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("sink {} already closed", self.path.display()))?;
        let jpeg = encode_jpeg(image, self.quality)?;
        writer
            .write_all(&jpeg)
            .and_then(|_| writer.flush())
            .map_err(|e| PipelineError::Output(format!("write {}: {e}", self.path.display())))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| PipelineError::Output(format!("flush {}: {e}", self.path.display())))?;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}
