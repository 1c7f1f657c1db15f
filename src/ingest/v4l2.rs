//! V4L2 camera capture.
//!
//! Opens a local device node (e.g., /dev/video0), requests RGB24 at the configured size
//! and rate, and captures through a memory-mapped buffer stream. The device handle and
//! its stream are owned together; dropping the capture closes the device.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::camera::CameraConfig;
use crate::frame::Frame;

const RGB24: &[u8; 4] = b"RGB3";
const MMAP_BUFFERS: u32 = 4;
const MIN_STALL: Duration = Duration::from_secs(2);

#[self_referencing]
struct OpenDevice {
    device: Device,
    #[borrows(mut device)]
    #[covariant]
    stream: MmapStream<'this, Device>,
}

pub(crate) struct V4l2Capture {
    path: String,
    open: OpenDevice,
    width: u32,
    height: u32,
    stall_after: Duration,
    next_index: u64,
    last_frame_at: Option<Instant>,
}

impl V4l2Capture {
    /// Open `config.device` and negotiate RGB24. The driver may pick a different size;
    /// the negotiated one is used for every frame.
    pub(crate) fn open(config: &CameraConfig) -> Result<Self> {
        let path = config.device.clone();
        let device =
            Device::with_path(&path).with_context(|| format!("open v4l2 device {path}"))?;

        let mut wanted = device.format().context("read v4l2 format")?;
        wanted.width = config.width;
        wanted.height = config.height;
        wanted.fourcc = FourCC::new(RGB24);
        let format = device.set_format(&wanted).or_else(|err| {
            log::warn!("CameraSource: {} rejected {}x{} RGB24: {}", path, config.width, config.height, err);
            device.format().context("read v4l2 format")
        })?;
        if format.fourcc != FourCC::new(RGB24) {
            return Err(anyhow!(
                "v4l2 device {} does not deliver RGB24 (got {})",
                path,
                format.fourcc
            ));
        }

        if config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("CameraSource: {} ignored {} fps: {}", path, config.fps, err);
            }
        }

        let open = OpenDeviceTryBuilder {
            device,
            stream_builder: |device| {
                MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .context("create v4l2 buffer stream")
            },
        }
        .try_build()?;

        log::info!(
            "CameraSource: acquired {} ({}x{})",
            path,
            format.width,
            format.height
        );
        let frame_interval = Duration::from_millis(1000 / u64::from(config.fps.max(1)));
        Ok(Self {
            path,
            open,
            width: format.width,
            height: format.height,
            stall_after: (frame_interval * 6).max(MIN_STALL),
            next_index: 0,
            last_frame_at: None,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        let mut pixels = self
            .open
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .with_context(|| format!("capture frame from {}", self.path))?;

        let now = Instant::now();
        if let Some(gap) = self.last_frame_at.map(|last| now - last) {
            if gap > self.stall_after {
                log::warn!("CameraSource: {} stalled for {:?}", self.path, gap);
            }
        }
        self.last_frame_at = Some(now);

        let index = self.next_index;
        self.next_index += 1;
        pixels.truncate(self.width as usize * self.height as usize * 3);
        Frame::from_rgb_bytes(index, pixels, self.width, self.height)
    }
}
