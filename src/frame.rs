//! Decoded frames.
//!
//! A `Frame` is one decoded RGB image tagged with its monotonically increasing index in
//! the source. Frames are ephemeral: the pipeline owns each one for a single iteration.
//! The only image retained across iterations is the motion analyzer's grayscale
//! predecessor, which is derived from (not a reference into) the frame.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Default JPEG quality for stream and MJPEG output.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub struct Frame {
    index: u64,
    image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb_bytes(index: u64, pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
        Ok(Self { index, image })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Copy of the frame at `width`x`height`.
    pub fn resized(&self, width: u32, height: u32) -> RgbImage {
        resize_rgb(&self.image, width, height)
    }
}

pub fn resize_rgb(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode JPEG frame")?;
    Ok(out)
}
