use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection, ObjectClass};

/// Stub backend for tests and model-less deployments. Returns a fixed set of boxes.
///
/// Boxes are expressed as fractions of the image so the same stub works at any
/// inference resolution.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    boxes: Vec<(BoundingBox, f32, ObjectClass)>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` person boxes laid out left to right, all at confidence 0.9.
    pub fn with_people(count: usize) -> Self {
        let slot = 1.0 / count.max(1) as f32;
        let boxes = (0..count)
            .map(|i| {
                let x1 = i as f32 * slot + slot * 0.1;
                let x2 = (i as f32 + 1.0) * slot - slot * 0.1;
                (BoundingBox::new(x1, 0.3, x2, 0.9), 0.9, ObjectClass::Person)
            })
            .collect();
        Self { boxes }
    }

    /// Add one box in normalized (0..1) coordinates.
    pub fn with_box(mut self, bbox: BoundingBox, confidence: f32, class: ObjectClass) -> Self {
        self.boxes.push((bbox, confidence, class));
        self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        class: ObjectClass,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(self
            .boxes
            .iter()
            .filter(|(_, conf, cls)| *cls == class && *conf >= confidence)
            .map(|(bbox, conf, cls)| Detection {
                bbox: bbox.scaled(w, h),
                confidence: *conf,
                class: *cls,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_returns_requested_people_in_pixel_space() {
        let mut backend = StubBackend::with_people(3);
        let image = RgbImage::new(100, 50);
        let dets = backend.detect(&image, ObjectClass::Person, 0.3).unwrap();
        assert_eq!(dets.len(), 3);
        for det in &dets {
            assert!(det.bbox.x2 <= 100.0 && det.bbox.y2 <= 50.0);
            assert!(det.bbox.width() > 0.0);
        }
    }

    #[test]
    fn stub_applies_class_and_threshold() {
        let mut backend = StubBackend::new()
            .with_box(BoundingBox::new(0.1, 0.1, 0.2, 0.2), 0.4, ObjectClass::Person)
            .with_box(BoundingBox::new(0.5, 0.5, 0.6, 0.6), 0.95, ObjectClass::Vehicle);
        let image = RgbImage::new(10, 10);
        assert_eq!(backend.detect(&image, ObjectClass::Person, 0.3).unwrap().len(), 1);
        assert!(backend.detect(&image, ObjectClass::Person, 0.87).unwrap().is_empty());
        assert_eq!(backend.detect(&image, ObjectClass::Vehicle, 0.87).unwrap().len(), 1);
    }
}
