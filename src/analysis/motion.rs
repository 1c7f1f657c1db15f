//! Temporal motion estimation.
//!
//! Dense Horn–Schunck optical flow between the previous and current sampled grayscale
//! frames (inference resolution). A pixel is moving iff its flow magnitude exceeds the
//! noise floor; `speed` is the mean magnitude over moving pixels and `coverage` the
//! moving share of the frame in percent.

use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::Serialize;

use crate::config::MotionSettings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MotionMetrics {
    /// Mean flow magnitude (pixels per sample) over moving pixels; 0 if none move.
    pub speed: f32,
    /// Percentage of pixels classified as moving, in `[0, 100]`.
    pub coverage: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowSettings {
    pub noise_floor: f32,
    /// Horn–Schunck regularization weight (alpha).
    pub smoothness: f32,
    pub iterations: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            noise_floor: 1.0,
            smoothness: 10.0,
            iterations: 24,
        }
    }
}

impl From<&MotionSettings> for FlowSettings {
    fn from(settings: &MotionSettings) -> Self {
        Self {
            noise_floor: settings.noise_floor,
            smoothness: settings.smoothness,
            iterations: settings.iterations,
        }
    }
}

/// Flow field, row-major, one `(u, v)` pair per pixel.
pub struct FlowField {
    pub width: u32,
    pub height: u32,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
}

impl FlowField {
    pub fn magnitudes(&self) -> impl Iterator<Item = f32> + '_ {
        self.u
            .iter()
            .zip(&self.v)
            .map(|(u, v)| (u * u + v * v).sqrt())
    }
}

/// Compute Horn–Schunck optical flow from `prev` to `curr`.
pub fn horn_schunck(prev: &GrayImage, curr: &GrayImage, smoothness: f32, iterations: u32) -> Result<FlowField> {
    if prev.dimensions() != curr.dimensions() {
        return Err(anyhow!(
            "flow frames differ in size: {:?} vs {:?}",
            prev.dimensions(),
            curr.dimensions()
        ));
    }
    let (width, height) = prev.dimensions();
    let (w, h) = (width as usize, height as usize);
    let len = w * h;

    let e1 = prev.as_raw();
    let e2 = curr.as_raw();
    let at = |buf: &[u8], x: usize, y: usize| -> f32 {
        buf[y.min(h - 1) * w + x.min(w - 1)] as f32
    };

    let mut ix = vec![0f32; len];
    let mut iy = vec![0f32; len];
    let mut it = vec![0f32; len];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let (a1, b1, c1, d1) = (
                at(e1, x, y),
                at(e1, x + 1, y),
                at(e1, x, y + 1),
                at(e1, x + 1, y + 1),
            );
            let (a2, b2, c2, d2) = (
                at(e2, x, y),
                at(e2, x + 1, y),
                at(e2, x, y + 1),
                at(e2, x + 1, y + 1),
            );
            ix[i] = 0.25 * ((b1 - a1) + (d1 - c1) + (b2 - a2) + (d2 - c2));
            iy[i] = 0.25 * ((c1 - a1) + (d1 - b1) + (c2 - a2) + (d2 - b2));
            it[i] = 0.25 * ((a2 - a1) + (b2 - b1) + (c2 - c1) + (d2 - d1));
        }
    }

    let alpha2 = smoothness * smoothness;
    let mut u = vec![0f32; len];
    let mut v = vec![0f32; len];
    let mut u_next = vec![0f32; len];
    let mut v_next = vec![0f32; len];

    for _ in 0..iterations {
        for y in 0..h {
            let up = y.saturating_sub(1);
            let down = (y + 1).min(h - 1);
            for x in 0..w {
                let left = x.saturating_sub(1);
                let right = (x + 1).min(w - 1);
                let avg = |f: &[f32]| -> f32 {
                    (f[up * w + x] + f[down * w + x] + f[y * w + left] + f[y * w + right]) / 6.0
                        + (f[up * w + left]
                            + f[up * w + right]
                            + f[down * w + left]
                            + f[down * w + right])
                            / 12.0
                };
                let i = y * w + x;
                let ubar = avg(&u);
                let vbar = avg(&v);
                let t = (ix[i] * ubar + iy[i] * vbar + it[i])
                    / (alpha2 + ix[i] * ix[i] + iy[i] * iy[i]);
                u_next[i] = ubar - ix[i] * t;
                v_next[i] = vbar - iy[i] * t;
            }
        }
        std::mem::swap(&mut u, &mut u_next);
        std::mem::swap(&mut v, &mut v_next);
    }

    Ok(FlowField {
        width,
        height,
        u,
        v,
    })
}

/// Speed and coverage between two grayscale frames of equal size.
pub fn measure(prev: &GrayImage, curr: &GrayImage, settings: &FlowSettings) -> Result<MotionMetrics> {
    let total = prev.width() as usize * prev.height() as usize;
    if total == 0 {
        return Ok(MotionMetrics::default());
    }
    let flow = horn_schunck(prev, curr, settings.smoothness, settings.iterations)?;

    let mut moving = 0usize;
    let mut magnitude_sum = 0f64;
    for magnitude in flow.magnitudes() {
        if magnitude > settings.noise_floor {
            moving += 1;
            magnitude_sum += f64::from(magnitude);
        }
    }
    let speed = if moving == 0 {
        0.0
    } else {
        (magnitude_sum / moving as f64) as f32
    };
    let coverage = (moving as f64 / total as f64 * 100.0) as f32;
    Ok(MotionMetrics {
        speed: speed.max(0.0),
        coverage: coverage.clamp(0.0, 100.0),
    })
}

/// Per-job motion state: holds exactly one previous grayscale sample.
pub struct MotionAnalyzer {
    settings: FlowSettings,
    previous: Option<GrayImage>,
}

impl MotionAnalyzer {
    pub fn new(settings: FlowSettings) -> Self {
        Self {
            settings,
            previous: None,
        }
    }

    /// Measure against the stored predecessor, then store `gray` in its place.
    /// Returns `None` for the first sample of a job.
    pub fn update(&mut self, gray: GrayImage) -> Result<Option<MotionMetrics>> {
        let metrics = match &self.previous {
            Some(prev) => Some(measure(prev, &gray, &self.settings)?),
            None => None,
        };
        self.previous = Some(gray);
        Ok(metrics)
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square_at(x0: u32, y0: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            if (x0..x0 + 16).contains(&x) && (y0..y0 + 16).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn first_sample_has_no_metrics() -> Result<()> {
        let mut analyzer = MotionAnalyzer::new(FlowSettings::default());
        assert!(analyzer.update(square_at(10, 10))?.is_none());
        assert!(analyzer.has_previous());
        assert!(analyzer.update(square_at(10, 10))?.is_some());
        Ok(())
    }

    #[test]
    fn all_black_pair_is_still() -> Result<()> {
        let black = GrayImage::new(32, 24);
        let metrics = measure(&black, &black, &FlowSettings::default())?;
        assert_eq!(metrics, MotionMetrics { speed: 0.0, coverage: 0.0 });
        Ok(())
    }

    #[test]
    fn identical_textured_frames_are_still() -> Result<()> {
        let frame = GrayImage::from_fn(40, 30, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));
        let metrics = measure(&frame, &frame, &FlowSettings::default())?;
        assert_eq!(metrics.coverage, 0.0);
        assert_eq!(metrics.speed, 0.0);
        Ok(())
    }

    #[test]
    fn shifted_square_registers_motion() -> Result<()> {
        let settings = FlowSettings {
            noise_floor: 0.05,
            ..FlowSettings::default()
        };
        let metrics = measure(&square_at(20, 20), &square_at(23, 20), &settings)?;
        assert!(metrics.coverage > 0.0);
        assert!(metrics.coverage <= 100.0);
        assert!(metrics.speed > 0.05);
        Ok(())
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let a = GrayImage::new(8, 8);
        let b = GrayImage::new(8, 9);
        assert!(measure(&a, &b, &FlowSettings::default()).is_err());
    }
}
