//! Local file frame source.
//!
//! `FileSource` picks a decoder from the path:
//! - `stub://...` synthetic clip
//! - `.mjpeg` / `.mjpg` concatenated JPEG frames
//! - anything else through FFmpeg (feature: ingest-file-ffmpeg)
//!
//! Remote URLs are rejected; uploads land on local disk before a job starts.

use anyhow::Result;
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::mjpeg::{MjpegFileSource, MJPEG_NOMINAL_FPS};
use super::synthetic::{SyntheticSource, SyntheticSpec};
use super::FrameSource;
use crate::frame::Frame;
use crate::PipelineError;

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Mjpeg(MjpegFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(PipelineError::Input(format!(
                "file ingestion only supports local paths (got '{path}')"
            ))
            .into());
        }
        if path.starts_with("stub://") {
            let spec = SyntheticSpec::parse(path).map_err(|e| PipelineError::Input(e.to_string()))?;
            log::info!("FileSource: opened {} (synthetic)", path);
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(spec)),
            });
        }

        let file_path = Path::new(path);
        if !file_path.is_file() {
            return Err(PipelineError::Input(format!("no such file: {path}")).into());
        }
        if is_mjpeg_path(file_path) {
            return Ok(Self {
                backend: FileBackend::Mjpeg(MjpegFileSource::open(file_path)?),
            });
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(file_path)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(PipelineError::Input(format!(
                "unsupported format for {path}: decoding requires the ingest-file-ffmpeg feature"
            ))
            .into())
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            FileBackend::Mjpeg(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn total_frames(&self) -> Option<u64> {
        match &self.backend {
            FileBackend::Synthetic(source) => source.spec().frames,
            FileBackend::Mjpeg(source) => Some(source.total_frames()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.total_frames(),
        }
    }

    fn fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.spec().fps,
            FileBackend::Mjpeg(_) => MJPEG_NOMINAL_FPS,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.fps(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => format!("stub://{}", source.spec().name),
            FileBackend::Mjpeg(source) => source.path().display().to_string(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.path().display().to_string(),
        }
    }
}

pub(crate) fn is_mjpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mjpeg") || ext.eq_ignore_ascii_case("mjpg"))
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classify_error, ErrorKind};

    #[test]
    fn rejects_urls_and_blank_paths() {
        for path in ["", "   ", "rtsp://camera/stream", "https://example.com/a.mp4"] {
            let err = FileSource::open(path).err().expect("must reject");
            assert_eq!(classify_error(&err), ErrorKind::Input);
        }
    }

    #[test]
    fn missing_file_is_input_error() {
        let err = FileSource::open("/definitely/not/here.mjpeg")
            .err()
            .expect("must reject");
        assert_eq!(classify_error(&err), ErrorKind::Input);
    }

    #[test]
    fn synthetic_clip_reports_total_and_fps() -> Result<()> {
        let mut source = FileSource::open("stub://clip?frames=4&width=8&height=8&fps=10")?;
        assert_eq!(source.total_frames(), Some(4));
        assert_eq!(source.fps(), 10.0);
        let mut count = 0;
        while source.next_frame()?.is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
        Ok(())
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn container_formats_need_ffmpeg() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\0\0\0\x18ftypmp42")?;
        let err = FileSource::open(path.to_str().unwrap())
            .err()
            .expect("must reject");
        assert_eq!(classify_error(&err), ErrorKind::Input);
        Ok(())
    }
}
