use serde::Serialize;

/// Axis-aligned box in pixel coordinates of the image it was detected on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: ObjectClass,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Unknown,
}

impl ObjectClass {
    /// Map a COCO-80 class index to the coarse classes used here.
    pub fn from_coco(class_id: usize) -> Self {
        match class_id {
            0 => ObjectClass::Person,
            1..=8 => ObjectClass::Vehicle,
            14..=23 => ObjectClass::Animal,
            _ => ObjectClass::Unknown,
        }
    }
}

/// Boxes found on one sampled frame, scoped to a single class.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    /// Width of the coordinate space the boxes are expressed in.
    pub width: u32,
    /// Height of the coordinate space the boxes are expressed in.
    pub height: u32,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>, width: u32, height: u32) -> Self {
        Self {
            detections,
            width,
            height,
        }
    }

    /// Number of boxes, i.e. the people count for a person-scoped result.
    pub fn count(&self) -> usize {
        self.detections.len()
    }

    /// Same boxes expressed in a `width`x`height` coordinate space.
    pub fn rescaled(&self, width: u32, height: u32) -> Self {
        if self.width == 0 || self.height == 0 {
            return Self::new(Vec::new(), width, height);
        }
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        let detections = self
            .detections
            .iter()
            .map(|det| Detection {
                bbox: det.bbox.scaled(sx, sy),
                ..det.clone()
            })
            .collect();
        Self::new(detections, width, height)
    }
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let overlaps = kept
            .iter()
            .any(|k| k.class == det.class && k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            confidence,
            class: ObjectClass::Person,
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn rescale_maps_inference_space_to_display_space() {
        let result = DetectionResult::new(vec![person(10.0, 20.0, 30.0, 40.0, 0.9)], 640, 360);
        let display = result.rescaled(1280, 720);
        assert_eq!((display.width, display.height), (1280, 720));
        assert_eq!(
            display.detections[0].bbox,
            BoundingBox::new(20.0, 40.0, 60.0, 80.0)
        );
        assert_eq!(display.count(), 1);
    }

    #[test]
    fn nms_drops_overlapping_lower_confidence_boxes() {
        let kept = non_max_suppression(
            vec![
                person(0.0, 0.0, 10.0, 10.0, 0.6),
                person(1.0, 1.0, 11.0, 11.0, 0.9),
                person(50.0, 50.0, 60.0, 60.0, 0.5),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.5);
    }

    #[test]
    fn coco_person_is_class_zero() {
        assert_eq!(ObjectClass::from_coco(0), ObjectClass::Person);
        assert_eq!(ObjectClass::from_coco(2), ObjectClass::Vehicle);
        assert_eq!(ObjectClass::from_coco(79), ObjectClass::Unknown);
    }
}
