use crate::detect::backend::ModelShape;
use crate::error::{DetectError, Result};
use crate::geometry::BoxCenterForm;
use crate::postprocess::{softmax, Detection};

/// Raw model outputs for one image.
///
/// `logits` is `[num_queries, num_classes]` and `boxes` is
/// `[num_queries, 4]` (normalized `cx, cy, w, h`), both row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPredictions {
    shape: ModelShape,
    logits: Vec<f32>,
    boxes: Vec<f32>,
}

impl RawPredictions {
    pub fn new(shape: ModelShape, logits: Vec<f32>, boxes: Vec<f32>) -> Result<Self> {
        if shape.num_classes < 2 {
            return Err(DetectError::MalformedOutput(format!(
                "need at least 2 classes (one real + background), got {}",
                shape.num_classes
            )));
        }
        let expected_logits = shape.num_queries * shape.num_classes;
        if logits.len() != expected_logits {
            return Err(DetectError::MalformedOutput(format!(
                "pred_logits has {} values, expected {} ({})",
                logits.len(),
                expected_logits,
                shape
            )));
        }
        if boxes.len() != shape.num_queries * 4 {
            return Err(DetectError::MalformedOutput(format!(
                "pred_boxes has {} values, expected {}",
                boxes.len(),
                shape.num_queries * 4
            )));
        }
        Ok(Self {
            shape,
            logits,
            boxes,
        })
    }

    pub fn shape(&self) -> ModelShape {
        self.shape
    }

    pub fn logits(&self) -> &[f32] {
        &self.logits
    }

    pub fn boxes(&self) -> &[f32] {
        &self.boxes
    }

    /// Fails with `ConfigMismatch` when the outputs do not have the configured shape.
    pub fn check_shape(&self, expected: ModelShape) -> Result<()> {
        if self.shape != expected {
            return Err(DetectError::ConfigMismatch(format!(
                "model emitted {}, configuration expects {}",
                self.shape, expected
            )));
        }
        Ok(())
    }

    /// Softmax each slot's logits and pair it with its box, in slot order.
    pub fn detections(&self) -> Result<Vec<Detection>> {
        self.logits
            .chunks_exact(self.shape.num_classes)
            .zip(self.boxes.chunks_exact(4))
            .map(|(logits, b)| Ok(Detection::new(softmax(logits), BoxCenterForm::from_slice(b)?)))
            .collect()
    }
}
