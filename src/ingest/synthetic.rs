//! Synthetic `stub://` sources for tests and demos.
//!
//! `stub://<name>?frames=<n>&width=<w>&height=<h>&motion=<static|drift>&fps=<f>`
//!
//! A static clip repeats one gradient pattern, so consecutive frames are identical and
//! optical flow between them is exactly zero. A drifting clip shifts the pattern two
//! pixels per frame.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::frame::Frame;

const DEFAULT_FRAMES: u64 = 100;
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 180;
const DEFAULT_FPS: f64 = 25.0;
const DRIFT_PX_PER_FRAME: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SyntheticMotion {
    Static,
    Drift,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SyntheticSpec {
    pub name: String,
    /// `None` for unbounded (camera) sources.
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub motion: SyntheticMotion,
    pub fps: f64,
}

impl SyntheticSpec {
    pub(crate) fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source must use stub:// ({url})"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut spec = Self {
            name: name.to_string(),
            frames: Some(DEFAULT_FRAMES),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            motion: SyntheticMotion::Static,
            fps: DEFAULT_FPS,
        };

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub parameter '{pair}'"))?;
            match key {
                "frames" => {
                    spec.frames = Some(
                        value
                            .parse()
                            .map_err(|_| anyhow!("stub frames must be an integer"))?,
                    )
                }
                "width" => {
                    spec.width = value
                        .parse()
                        .map_err(|_| anyhow!("stub width must be an integer"))?
                }
                "height" => {
                    spec.height = value
                        .parse()
                        .map_err(|_| anyhow!("stub height must be an integer"))?
                }
                "fps" => {
                    spec.fps = value
                        .parse()
                        .map_err(|_| anyhow!("stub fps must be a number"))?
                }
                "motion" => {
                    spec.motion = match value {
                        "static" => SyntheticMotion::Static,
                        "drift" => SyntheticMotion::Drift,
                        other => return Err(anyhow!("unknown stub motion '{other}'")),
                    }
                }
                other => return Err(anyhow!("unknown stub parameter '{other}'")),
            }
        }

        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("stub dimensions must be greater than zero"));
        }
        if spec.fps.is_nan() || spec.fps <= 0.0 {
            return Err(anyhow!("stub fps must be greater than zero"));
        }
        Ok(spec)
    }
}

pub(crate) struct SyntheticSource {
    spec: SyntheticSpec,
    frame_count: u64,
}

impl SyntheticSource {
    pub(crate) fn new(spec: SyntheticSpec) -> Self {
        Self {
            spec,
            frame_count: 0,
        }
    }

    pub(crate) fn spec(&self) -> &SyntheticSpec {
        &self.spec
    }

    pub(crate) fn next_frame(&mut self) -> Option<Frame> {
        if let Some(limit) = self.spec.frames {
            if self.frame_count >= limit {
                return None;
            }
        }
        let index = self.frame_count;
        self.frame_count += 1;
        Some(Frame::new(index, self.generate(index)))
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate(&self, index: u64) -> RgbImage {
        let offset = match self.spec.motion {
            SyntheticMotion::Static => 0,
            SyntheticMotion::Drift => index * DRIFT_PX_PER_FRAME,
        };
        RgbImage::from_fn(self.spec.width, self.spec.height, |x, y| {
            let base = (x as u64 + offset) * 3 + y as u64;
            Rgb([
                (base % 256) as u8,
                ((base / 2) % 256) as u8,
                ((x as u64 + offset) % 64 * 4) as u8,
            ])
        })
    }
}
