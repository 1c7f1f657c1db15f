use anyhow::Result;
use image::RgbImage;

use super::backend::DetectorBackend;
use super::result::{DetectionResult, ObjectClass};
use crate::frame::Frame;
use crate::PipelineError;

/// Wraps a detector backend behind the pipeline's detection contract.
///
/// Frames are resized to the inference resolution before the backend sees them, so the
/// returned `DetectionResult` is in inference space. Callers rescale it to display space
/// with `DetectionResult::rescaled` before drawing.
pub struct DetectionAdapter {
    backend: Box<dyn DetectorBackend>,
    inference_width: u32,
    inference_height: u32,
}

impl DetectionAdapter {
    pub fn new(backend: Box<dyn DetectorBackend>, inference_width: u32, inference_height: u32) -> Self {
        Self {
            backend,
            inference_width,
            inference_height,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn inference_size(&self) -> (u32, u32) {
        (self.inference_width, self.inference_height)
    }

    /// Detect `class` objects at or above `confidence`. Backend failures surface as
    /// `PipelineError::Detection`.
    pub fn detect(
        &mut self,
        frame: &Frame,
        class: ObjectClass,
        confidence: f32,
    ) -> Result<DetectionResult> {
        let image = frame.resized(self.inference_width, self.inference_height);
        self.detect_inference(&image, frame.index(), class, confidence)
    }

    /// Like `detect`, for a frame the caller already resized to `inference_size`.
    /// The result is in `image`'s pixel space.
    pub fn detect_inference(
        &mut self,
        image: &RgbImage,
        frame_index: u64,
        class: ObjectClass,
        confidence: f32,
    ) -> Result<DetectionResult> {
        let detections = self
            .backend
            .detect(image, class, confidence)
            .map_err(|e| {
                PipelineError::Detection(format!(
                    "{} backend failed on frame {}: {e:#}",
                    self.backend.name(),
                    frame_index
                ))
            })?
            .into_iter()
            .filter(|det| det.class == class && det.confidence >= confidence)
            .collect();
        Ok(DetectionResult::new(detections, image.width(), image.height()))
    }
}
