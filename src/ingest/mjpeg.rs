//! Motion-JPEG file source: a file of back-to-back JPEG images.

use anyhow::Result;
use image::ImageFormat;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::PipelineError;

/// MJPEG carries no timing; this is the nominal rate reported to sinks.
pub(crate) const MJPEG_NOMINAL_FPS: f64 = 25.0;

/// Byte ranges of each SOI..EOI image in `data`.
pub(crate) fn split_jpeg_frames(data: &[u8]) -> Vec<Range<usize>> {
    let mut frames = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find_marker(data, cursor, 0xD8) {
        let Some(end) = find_marker(data, start + 2, 0xD9) else {
            break;
        };
        frames.push(start..end + 2);
        cursor = end + 2;
    }
    frames
}

fn find_marker(data: &[u8], from: usize, marker: u8) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == marker)
        .map(|pos| from + pos)
}

pub(crate) struct MjpegFileSource {
    path: PathBuf,
    data: Vec<u8>,
    frames: Vec<Range<usize>>,
    cursor: usize,
}

impl MjpegFileSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            PipelineError::Input(format!("failed to read {}: {}", path.display(), e))
        })?;
        let frames = split_jpeg_frames(&data);
        if frames.is_empty() {
            return Err(PipelineError::Input(format!(
                "{} contains no JPEG frames",
                path.display()
            ))
            .into());
        }
        log::info!(
            "FileSource: opened {} (mjpeg, {} frames)",
            path.display(),
            frames.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            data,
            frames,
            cursor: 0,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(range) = self.frames.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;
        let image = image::load_from_memory_with_format(&self.data[range], ImageFormat::Jpeg)
            .map_err(|e| {
                PipelineError::Input(format!(
                    "corrupt frame {} in {}: {}",
                    index,
                    self.path.display(),
                    e
                ))
            })?
            .to_rgb8();
        Ok(Some(Frame::new(index, image)))
    }

    pub(crate) fn total_frames(&self) -> u64 {
        self.frames.len() as u64
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_jpeg;
    use image::{Rgb, RgbImage};
    use std::io::Write;

    #[test]
    fn splits_concatenated_jpegs() {
        let a = encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])), 80).unwrap();
        let b = encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([200, 2, 3])), 80).unwrap();
        let mut data = a.clone();
        data.extend_from_slice(&b);
        let ranges = split_jpeg_frames(&data);
        assert_eq!(ranges, vec![0..a.len(), a.len()..a.len() + b.len()]);
    }

    #[test]
    fn empty_or_garbage_has_no_frames() {
        assert!(split_jpeg_frames(&[]).is_empty());
        assert!(split_jpeg_frames(b"not a jpeg at all").is_empty());
    }

    #[test]
    fn decodes_frames_in_order_then_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mjpeg");
        let mut file = std::fs::File::create(&path)?;
        for shade in [10u8, 120, 240] {
            file.write_all(&encode_jpeg(
                &RgbImage::from_pixel(16, 12, Rgb([shade, shade, shade])),
                90,
            )?)?;
        }
        drop(file);

        let mut source = MjpegFileSource::open(&path)?;
        assert_eq!(source.total_frames(), 3);
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            assert_eq!(frame.image().dimensions(), (16, 12));
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn rejects_file_without_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.mjpeg");
        std::fs::write(&path, b"garbage")?;
        let err = MjpegFileSource::open(&path).err().expect("open must fail");
        assert_eq!(crate::classify_error(&err), crate::ErrorKind::Input);
        Ok(())
    }
}
