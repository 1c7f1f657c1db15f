#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection, ObjectClass};
use crate::frame::resize_rgb;

type Plan = TypedRunnableModel<TypedModel>;

/// Loaded, optimized YOLOv8-style ONNX model. Cheap to clone; clones share the plan.
#[derive(Clone)]
pub struct TractModel {
    plan: Arc<Plan>,
    input_size: u32,
}

impl TractModel {
    /// Load an ONNX model expecting a `[1, 3, input_size, input_size]` f32 input.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!(
            "TractModel: loaded {} ({}x{} input)",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self {
            plan: Arc::new(plan),
            input_size,
        })
    }
}

/// Tract-based person detector.
///
/// Square-resizes the inference frame to the model input, decodes a `[1, 4+C, A]`
/// YOLOv8 head, filters by class and confidence, and applies greedy NMS. Boxes are
/// returned in the pixel space of the image passed to `detect`.
pub struct TractBackend {
    model: TractModel,
    iou_threshold: f32,
}

impl TractBackend {
    pub fn new(model: TractModel, iou_threshold: f32) -> Self {
        Self {
            model,
            iou_threshold,
        }
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = self.model.input_size;
        let resized = resize_rgb(image, side, side);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        class: ObjectClass,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not [1, 4+C, A]")?;

        let (_, rows, anchors) = view.dim();
        if rows < 5 {
            return Err(anyhow!("model output has {rows} rows, expected at least 5"));
        }
        let sx = image.width() as f32 / self.model.input_size as f32;
        let sy = image.height() as f32 / self.model.input_size as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (best, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, a]]))
                .fold((0, f32::NEG_INFINITY), |acc, cur| {
                    if cur.1 > acc.1 {
                        cur
                    } else {
                        acc
                    }
                });
            if score < confidence || ObjectClass::from_coco(best) != class {
                continue;
            }
            let bbox = BoundingBox::from_center(
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]].abs(),
                view[[0, 3, a]].abs(),
            )
            .scaled(sx, sy);
            let bbox = BoundingBox::new(
                bbox.x1.clamp(0.0, image.width() as f32),
                bbox.y1.clamp(0.0, image.height() as f32),
                bbox.x2.clamp(0.0, image.width() as f32),
                bbox.y2.clamp(0.0, image.height() as f32),
            );
            if bbox.area() <= 0.0 {
                continue;
            }
            candidates.push(Detection {
                bbox,
                confidence: score,
                class,
            });
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}
