//! Frame sinks.
//!
//! File sinks persist the annotated frames of a batch job; the live feed fans encoded
//! frames out to any number of stream subscribers.

pub mod feed;
#[cfg(feature = "encode-ffmpeg")]
pub mod ffmpeg;
pub mod mjpeg;

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

pub use feed::{FeedEvent, FeedSubscriber, LiveFeed};
#[cfg(feature = "encode-ffmpeg")]
pub use ffmpeg::FfmpegFileSink;
pub use mjpeg::MjpegFileSink;

/// A write-once destination for annotated frames.
pub trait FrameSink {
    fn write(&mut self, image: &RgbImage) -> Result<()>;

    /// Flush and finalize. Further writes are an error.
    fn close(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

/// Container written by batch jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputContainer {
    /// Concatenated JPEG frames, no codec dependency.
    Mjpeg,
    /// H.264 in MP4 (feature: encode-ffmpeg).
    Mp4,
}

impl OutputContainer {
    /// Best container this build can write.
    pub fn select() -> Self {
        if cfg!(feature = "encode-ffmpeg") {
            OutputContainer::Mp4
        } else {
            OutputContainer::Mjpeg
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputContainer::Mjpeg => "mjpeg",
            OutputContainer::Mp4 => "mp4",
        }
    }

    fn accepts_extension(self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        match self {
            OutputContainer::Mjpeg => ext == "mjpeg" || ext == "mjpg",
            OutputContainer::Mp4 => ext == "mp4",
        }
    }

    /// Open a sink for `path`. `fps` is the output frame rate.
    pub fn create_sink(self, path: &Path, fps: f64) -> Result<Box<dyn FrameSink>> {
        match self {
            OutputContainer::Mjpeg => {
                let _ = fps;
                Ok(Box::new(MjpegFileSink::create(path)?))
            }
            #[cfg(feature = "encode-ffmpeg")]
            OutputContainer::Mp4 => Ok(Box::new(FfmpegFileSink::create(path, fps)?)),
            #[cfg(not(feature = "encode-ffmpeg"))]
            OutputContainer::Mp4 => Err(crate::PipelineError::Output(
                "mp4 output requires the encode-ffmpeg feature".to_string(),
            )
            .into()),
        }
    }
}

/// Deterministic output name: `processed_<input name>`, with the extension replaced
/// when the container does not match it.
pub fn output_file_name(input_name: &str, container: OutputContainer) -> String {
    let path = Path::new(input_name);
    let ext = path.extension().and_then(|e| e.to_str());
    match ext {
        Some(ext) if container.accepts_extension(ext) => format!("processed_{input_name}"),
        _ => {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(input_name);
            format!("processed_{stem}.{}", container.extension())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_names_are_deterministic() {
        assert_eq!(
            output_file_name("clip.mjpeg", OutputContainer::Mjpeg),
            "processed_clip.mjpeg"
        );
        assert_eq!(
            output_file_name("clip.mp4", OutputContainer::Mjpeg),
            "processed_clip.mjpeg"
        );
        assert_eq!(
            output_file_name("clip.mp4", OutputContainer::Mp4),
            "processed_clip.mp4"
        );
        assert_eq!(
            output_file_name("clip.avi", OutputContainer::Mp4),
            "processed_clip.mp4"
        );
        assert_eq!(
            output_file_name("crowd", OutputContainer::Mjpeg),
            "processed_crowd.mjpeg"
        );
    }
}
