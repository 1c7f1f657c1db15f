//! Frame ingestion sources.
//!
//! This module provides the sources the pipeline pulls frames from:
//! - Synthetic clips and cameras (`stub://`, testing and demos)
//! - Motion-JPEG files (concatenated JPEG frames, decoded with `image`)
//! - Other local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! Every source yields `Frame`s with 0-based, strictly increasing indices and signals
//! end-of-stream with `Ok(None)`. Frame acquisition is the only blocking point of the
//! pipeline. Decode failures are reported as `PipelineError::Input`.

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub(crate) mod mjpeg;
pub(crate) mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource, DeviceLease};
pub use file::FileSource;

/// A sequential source of decoded frames.
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Total frame count when the container reports one.
    fn total_frames(&self) -> Option<u64>;

    /// Nominal frames per second.
    fn fps(&self) -> f64;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}
