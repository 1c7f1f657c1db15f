#![cfg(feature = "encode-ffmpeg")]

//! H.264/MP4 file sink via FFmpeg.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::FrameSink;
use crate::PipelineError;

pub struct FfmpegFileSink {
    path: PathBuf,
    fps: i32,
    state: Option<EncoderState>,
    frames: u64,
}

struct EncoderState {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
}

impl FfmpegFileSink {
    /// Output frame rate is `max(1, fps)` rounded to whole frames per second.
    /// The encoder opens lazily on the first frame, sized to it.
    pub fn create(path: &Path, fps: f64) -> Result<Self> {
        ffmpeg::init().map_err(|e| PipelineError::Output(format!("ffmpeg init failed: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            fps: fps.round().max(1.0) as i32,
            state: None,
            frames: 0,
        })
    }

    fn open(&self, width: u32, height: u32) -> Result<EncoderState> {
        let mut output = ffmpeg::format::output(&self.path)
            .with_context(|| format!("create output {}", self.path.display()))?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| anyhow!("H.264 encoder not available"))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let mut stream = output.add_stream(codec).context("add video stream")?;
        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(ffmpeg::format::Pixel::YUV420P);
        video.set_time_base((1, self.fps));
        video.set_frame_rate(Some((self.fps, 1)));
        if global_header {
            video.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = video.open_as(codec).context("open H.264 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base((1, self.fps));
        let stream_index = stream.index();

        output.write_header().context("write container header")?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create RGB to YUV scaler")?;

        Ok(EncoderState {
            output,
            encoder,
            scaler,
            stream_index,
            width,
            height,
        })
    }
}

impl EncoderState {
    fn drain(&mut self, fps: i32) -> Result<()> {
        let stream_tb = self
            .output
            .stream(self.stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("output stream missing"))?;
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts((1, fps), stream_tb);
            packet
                .write_interleaved(&mut self.output)
                .context("write packet")?;
        }
        Ok(())
    }

    fn encode(&mut self, image: &RgbImage, pts: i64, fps: i32) -> Result<()> {
        let mut rgb = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        let row_len = self.width as usize * 3;
        let src = image.as_raw();
        let dst = rgb.data_mut(0);
        for (y, row) in src.chunks_exact(row_len).enumerate() {
            let start = y * stride;
            let target = dst
                .get_mut(start..start + row_len)
                .context("frame buffer smaller than image")?;
            target.copy_from_slice(row);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler.run(&rgb, &mut yuv).context("convert frame to YUV")?;
        yuv.set_pts(Some(pts));
        self.encoder.send_frame(&yuv).context("encode frame")?;
        self.drain(fps)
    }

    fn finish(&mut self, fps: i32) -> Result<()> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain(fps)?;
        self.output.write_trailer().context("write container trailer")?;
        Ok(())
    }
}

impl FrameSink for FfmpegFileSink {
    fn write(&mut self, image: &RgbImage) -> Result<()> {
        if self.state.is_none() {
            let state = self
                .open(image.width(), image.height())
                .map_err(|e| PipelineError::Output(format!("{e:#}")))?;
            self.state = Some(state);
        }
        let fps = self.fps;
        let pts = self.frames as i64;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("encoder not open"))?;
        if image.dimensions() != (state.width, state.height) {
            return Err(PipelineError::Output(format!(
                "frame size {:?} differs from stream size {}x{}",
                image.dimensions(),
                state.width,
                state.height
            ))
            .into());
        }
        state
            .encode(image, pts, fps)
            .map_err(|e| PipelineError::Output(format!("{e:#}")))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let fps = self.fps;
        if let Some(mut state) = self.state.take() {
            state
                .finish(fps)
                .map_err(|e| PipelineError::Output(format!("{e:#}")))?;
        }
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}
