use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{Detection, ObjectClass};

/// Detector backend trait.
///
/// A backend receives an image already resized to the inference resolution and returns
/// boxes in that image's pixel space. Backends hold no reference to the image after
/// `detect` returns.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection, keeping only `class` boxes with confidence >= `confidence`.
    fn detect(
        &mut self,
        image: &RgbImage,
        class: ObjectClass,
        confidence: f32,
    ) -> Result<Vec<Detection>>;
}
