//! Frame annotation.
//!
//! Draws person boxes and a fixed-height HUD header onto the display-resolution frame.
//! The header carries a level-colored marker, a score-band strip, and two lines of risk
//! and motion text. DejaVu Sans is bundled as the HUD font; `hud.font_path` overrides it.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use rusttype::{point, Font, Scale};
use std::path::Path;

use crate::analysis::RiskAssessment;
use crate::detect::DetectionResult;
use crate::{RiskLevel, ScoreBand};

const HEADER_HEIGHT: u32 = 64;
const MARKER_WIDTH: u32 = 14;
const BAND_STRIP: u32 = 5;
const BOX_THICKNESS: u32 = 2;
const TEXT_SIZE: f32 = 22.0;

const HEADER_BG: Rgb<u8> = Rgb([24, 24, 24]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 200, 255]);

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

pub fn level_color(level: RiskLevel) -> Rgb<u8> {
    match level {
        RiskLevel::Low => Rgb([0, 200, 0]),
        RiskLevel::Medium => Rgb([255, 165, 0]),
        RiskLevel::High => Rgb([230, 0, 0]),
    }
}

pub fn band_color(band: ScoreBand) -> Rgb<u8> {
    match band {
        ScoreBand::Neutral => Rgb([128, 128, 128]),
        ScoreBand::Caution => Rgb([255, 215, 0]),
        ScoreBand::Critical => Rgb([200, 0, 80]),
    }
}

/// HUD text, one entry per header line.
pub fn hud_lines(risk: &RiskAssessment) -> Vec<String> {
    let motion = match risk.motion {
        Some(m) => format!("Velocity: {:.2}  Coverage: {:.1}%", m.speed, m.coverage),
        None => "Velocity: n/a  Coverage: n/a".to_string(),
    };
    let cause = risk.primary_cause.map(|c| c.as_str()).unwrap_or("-");
    vec![
        format!(
            "RISK: {}  Score: {:.0}  People: {}  {}",
            risk.level.as_str(),
            risk.score,
            risk.people_count,
            risk.motion_status.as_str()
        ),
        format!("{motion}  Cause: {cause}"),
    ]
}

pub struct FrameAnnotator {
    font: Option<Font<'static>>,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAnnotator {
    /// Annotator using the bundled HUD font.
    pub fn new() -> Self {
        let font = Font::try_from_bytes(BUNDLED_FONT);
        if font.is_none() {
            log::warn!("FrameAnnotator: bundled HUD font failed to parse; drawing boxes and bands only");
        }
        Self { font }
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read HUD font {}", path.display()))?;
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| anyhow!("{} is not a usable TrueType font", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn from_font_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::with_font_file(path),
            None => Ok(Self::new()),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render boxes and HUD onto a copy of `frame`.
    ///
    /// `detections` are rescaled to the frame when they are in another coordinate space.
    pub fn annotate(
        &self,
        frame: &RgbImage,
        detections: &DetectionResult,
        risk: &RiskAssessment,
    ) -> RgbImage {
        let mut out = frame.clone();
        let (w, h) = out.dimensions();
        if w == 0 || h == 0 {
            return out;
        }

        let rescaled;
        let detections = if (detections.width, detections.height) == (w, h) {
            detections
        } else {
            rescaled = detections.rescaled(w, h);
            &rescaled
        };
        for det in &detections.detections {
            draw_rect_outline(
                &mut out,
                det.bbox.x1.round() as i64,
                det.bbox.y1.round() as i64,
                det.bbox.x2.round() as i64,
                det.bbox.y2.round() as i64,
                BOX_COLOR,
            );
        }

        let header = HEADER_HEIGHT.min(h);
        fill_rect(&mut out, 0, 0, w, header, HEADER_BG);
        fill_rect(&mut out, 0, 0, MARKER_WIDTH.min(w), header, level_color(risk.level));
        let strip = BAND_STRIP.min(header);
        fill_rect(&mut out, 0, header - strip, w, strip, band_color(risk.band));

        if let Some(font) = &self.font {
            let lines = hud_lines(risk);
            let x = MARKER_WIDTH as i32 + 8;
            draw_text(&mut out, font, x, 4, &lines[0], TEXT_SIZE, level_color(risk.level));
            draw_text(&mut out, font, x, 4 + TEXT_SIZE as i32 + 2, &lines[1], TEXT_SIZE * 0.8, TEXT_COLOR);
        }
        out
    }
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(img.width());
    let y_end = (y + h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn draw_rect_outline(img: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgb<u8>) {
    let max_x = img.width() as i64 - 1;
    let max_y = img.height() as i64 - 1;
    let (x1, x2) = (x1.clamp(0, max_x), x2.clamp(0, max_x));
    let (y1, y2) = (y1.clamp(0, max_y), y2.clamp(0, max_y));
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    let t = BOX_THICKNESS as i64;
    for y in y1..=y2 {
        for x in x1..=x2 {
            let edge = x - x1 < t || x2 - x < t || y - y1 < t || y2 - y < t;
            if edge {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn draw_text(img: &mut RgbImage, font: &Font<'_>, x: i32, y: i32, text: &str, size: f32, color: Rgb<u8>) {
    let scale = Scale::uniform(size);
    let ascent = font.v_metrics(scale).ascent;
    let (w, h) = (img.width() as i32, img.height() as i32);
    for glyph in font.layout(text, scale, point(0.0, ascent)) {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let px = x + bb.min.x + gx as i32;
            let py = y + bb.min.y + gy as i32;
            if px < 0 || py < 0 || px >= w || py >= h {
                return;
            }
            let pixel = img.get_pixel_mut(px as u32, py as u32);
            for c in 0..3 {
                let blended = color[c] as f32 * coverage + pixel[c] as f32 * (1.0 - coverage);
                pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{MotionMetrics, PrimaryCause, RiskScorer, RiskWeights};
    use crate::detect::{BoundingBox, Detection, ObjectClass};

    fn one_box(width: u32, height: u32) -> DetectionResult {
        DetectionResult::new(
            vec![Detection {
                bbox: BoundingBox::new(10.0, 20.0, 30.0, 40.0),
                confidence: 0.9,
                class: ObjectClass::Person,
            }],
            width,
            height,
        )
    }

    #[test]
    fn draws_header_marker_band_and_boxes() {
        let frame = RgbImage::new(200, 150);
        let risk = RiskScorer::new(RiskWeights::default()).evaluate(1, 6.0, 0.0);
        let out = FrameAnnotator::new().annotate(&frame, &one_box(100, 75), &risk);

        assert_eq!(out.dimensions(), frame.dimensions());
        assert_eq!(*out.get_pixel(0, 0), level_color(RiskLevel::High));
        assert_eq!(*out.get_pixel(100, HEADER_HEIGHT - 1), band_color(risk.band));
        assert_eq!(*out.get_pixel(100, 54), HEADER_BG);
        // Box (10,20)-(30,40) at 100x75 lands at (20,40)-(60,80) on the 200x150 frame.
        assert_eq!(*out.get_pixel(20, 70), BOX_COLOR);
        assert_eq!(*out.get_pixel(40, 70), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn marker_follows_level() {
        let frame = RgbImage::new(64, 64);
        let empty = DetectionResult::new(Vec::new(), 64, 64);
        let mut scorer = RiskScorer::new(RiskWeights::default());
        let low = scorer.baseline(0);
        let medium = scorer.evaluate(0, 0.0, 15.0);
        let annotator = FrameAnnotator::default();
        assert_eq!(
            *annotator.annotate(&frame, &empty, &low).get_pixel(1, 1),
            level_color(RiskLevel::Low)
        );
        assert_eq!(
            *annotator.annotate(&frame, &empty, &medium).get_pixel(1, 1),
            level_color(RiskLevel::Medium)
        );
    }

    #[test]
    fn hud_text_reports_metrics_and_cause() {
        let mut scorer = RiskScorer::new(RiskWeights::default());
        let first = scorer.baseline(2);
        assert!(hud_lines(&first)[1].contains("n/a"));
        assert!(hud_lines(&first)[1].ends_with("Cause: -"));

        let dense = scorer.evaluate(5, 1.25, 25.0);
        let lines = hud_lines(&dense);
        assert!(lines[0].starts_with("RISK: MEDIUM"));
        assert!(lines[0].contains("People: 5"));
        assert!(lines[1].contains("Velocity: 1.25"));
        assert!(lines[1].contains(PrimaryCause::DensityChange.as_str()));
        assert_eq!(dense.motion, Some(MotionMetrics { speed: 1.25, coverage: 25.0 }));
    }

    fn header(image: &RgbImage) -> Vec<u8> {
        image::imageops::crop_imm(image, 0, 0, image.width(), HEADER_HEIGHT)
            .to_image()
            .into_raw()
    }

    #[test]
    fn default_header_text_tracks_score_and_cause() {
        let frame = RgbImage::new(1280, 720);
        let empty = DetectionResult::new(Vec::new(), 1280, 720);
        let annotator = FrameAnnotator::new();
        assert!(annotator.has_font());

        let mut scorer = RiskScorer::new(RiskWeights::default());
        let sparse = scorer.evaluate(1, 0.0, 12.0);
        let busier = scorer.evaluate(9, 0.0, 14.0);
        assert_eq!(sparse.level, busier.level);
        let a = annotator.annotate(&frame, &empty, &sparse);
        let b = annotator.annotate(&frame, &empty, &busier);
        assert_ne!(header(&a), header(&b));

        // Same level and people, only the cause differs.
        let mut scorer = RiskScorer::new(RiskWeights::default());
        let no_cause = scorer.evaluate(4, 0.0, 19.0);
        let mut scorer = RiskScorer::new(RiskWeights::default());
        let density = scorer.evaluate(4, 0.0, 20.0);
        assert_eq!(no_cause.primary_cause, None);
        assert_eq!(density.primary_cause, Some(PrimaryCause::DensityChange));
        let c = annotator.annotate(&frame, &empty, &no_cause);
        let d = annotator.annotate(&frame, &empty, &density);
        assert_ne!(header(&c), header(&d));

        let text_pixels = header(&a)
            .chunks(3)
            .filter(|px| *px == TEXT_COLOR.0.as_slice())
            .count();
        assert!(text_pixels > 0);
    }

    #[test]
    fn font_override_and_missing_file() -> Result<()> {
        let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/DejaVuSans.ttf");
        assert!(FrameAnnotator::from_font_path(Some(&bundled))?.has_font());
        assert!(FrameAnnotator::from_font_path(None)?.has_font());
        assert!(FrameAnnotator::with_font_file(Path::new("/nonexistent/font.ttf")).is_err());
        Ok(())
    }
}
