//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream in-memory and converts every frame to RGB24.
//! At end of input the decoder is flushed so trailing buffered frames are delivered
//! before `None`.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::PipelineError;

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    total_frames: Option<u64>,
    fps: f64,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        Self::open_inner(path).map_err(|e| PipelineError::Input(format!("{e:#}")).into())
    }

    fn open_inner(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let total_frames = u64::try_from(input_stream.frames())
            .ok()
            .filter(|frames| *frames > 0);
        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 && rate.numerator() > 0 {
            f64::from(rate)
        } else {
            25.0
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FileSource: opened {} (ffmpeg, {}x{}, {:.2} fps, {:?} frames)",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps,
            total_frames
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            total_frames,
            fps,
            frame_count: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder.send_packet(&packet).map_err(|e| {
                        PipelineError::Input(format!("decode {}: {}", self.path.display(), e))
                    })?;
                }
                Some(_) => continue,
                None => {
                    self.decoder
                        .send_eof()
                        .context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let index = self.frame_count;
        self.frame_count += 1;
        Frame::from_rgb_bytes(index, pixels, width, height)
    }

    pub(crate) fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub(crate) fn fps(&self) -> f64 {
        self.fps
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
