use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectionModel, ModelShape};
use crate::detect::result::RawPredictions;
use crate::geometry::ImageSize;
use crate::preprocess::ImageTensor;

/// Substitute model returning scripted predictions.
///
/// Queued predictions are returned first, one per call; afterwards every
/// call returns the fallback. Used by tests and by checkpoint-free demo runs.
pub struct StubModel {
    shape: ModelShape,
    fallback: RawPredictions,
    state: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    queue: VecDeque<RawPredictions>,
    calls: usize,
    last_input: Option<ImageSize>,
}

impl StubModel {
    pub fn fixed(predictions: RawPredictions) -> Self {
        Self {
            shape: predictions.shape(),
            fallback: predictions,
            state: Mutex::new(StubState::default()),
        }
    }

    /// Return `queue` in order, then `fallback` forever.
    pub fn scripted(queue: Vec<RawPredictions>, fallback: RawPredictions) -> Self {
        Self {
            shape: fallback.shape(),
            fallback,
            state: Mutex::new(StubState {
                queue: queue.into(),
                ..StubState::default()
            }),
        }
    }

    /// Every slot predicts background except slot 0, a confident centered
    /// detection of class 1.
    pub fn demo(shape: ModelShape) -> crate::error::Result<Self> {
        if shape.num_classes < 2 || shape.num_queries == 0 {
            return Err(crate::error::DetectError::Config(format!(
                "demo model needs at least one query and two classes, got {shape}"
            )));
        }
        let mut logits = vec![0.0f32; shape.num_queries * shape.num_classes];
        let mut boxes = vec![0.0f32; shape.num_queries * 4];
        for (slot, row) in logits.chunks_exact_mut(shape.num_classes).enumerate() {
            let hot = if slot == 0 {
                1.min(shape.num_classes - 2)
            } else {
                shape.num_classes - 1
            };
            row[hot] = 8.0;
        }
        for (slot, b) in boxes.chunks_exact_mut(4).enumerate() {
            let offset = (slot % 10) as f32 * 0.05;
            b.copy_from_slice(&[0.25 + offset, 0.25 + offset, 0.1, 0.1]);
        }
        boxes[..4].copy_from_slice(&[0.5, 0.5, 0.2, 0.4]);
        Ok(Self::fixed(RawPredictions::new(shape, logits, boxes)?))
    }

    /// Number of forward passes served so far.
    pub fn calls(&self) -> usize {
        self.state.lock().map(|s| s.calls).unwrap_or(0)
    }

    /// Size of the most recent input tensor.
    pub fn last_input_size(&self) -> Option<ImageSize> {
        self.state.lock().ok().and_then(|s| s.last_input)
    }
}

impl DetectionModel for StubModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn infer(&self, input: &ImageTensor) -> Result<RawPredictions> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("stub model lock poisoned"))?;
        state.calls += 1;
        state.last_input = Some(input.size());
        Ok(state
            .queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::Postprocessor;

    fn tensor() -> ImageTensor {
        ImageTensor::new(ImageSize::new(2, 2), vec![0.0; 12]).unwrap()
    }

    #[test]
    fn demo_model_yields_one_confident_slot() -> Result<()> {
        let shape = ModelShape {
            num_queries: 100,
            num_classes: 92,
        };
        let model = StubModel::demo(shape)?;
        let preds = model.infer(&tensor())?;
        assert_eq!(preds.shape(), shape);

        let set = Postprocessor::default().process(preds.detections()?, ImageSize::new(640, 480))?;
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().class.class_id, 1);
        assert_eq!(model.calls(), 1);
        assert_eq!(model.last_input_size(), Some(ImageSize::new(2, 2)));
        Ok(())
    }

    #[test]
    fn scripted_queue_drains_before_fallback() -> Result<()> {
        let shape = ModelShape {
            num_queries: 1,
            num_classes: 2,
        };
        let first = RawPredictions::new(shape, vec![1.0, 0.0], vec![0.5; 4])?;
        let fallback = RawPredictions::new(shape, vec![0.0, 1.0], vec![0.5; 4])?;
        let model = StubModel::scripted(vec![first.clone()], fallback.clone());

        assert_eq!(model.infer(&tensor())?, first);
        assert_eq!(model.infer(&tensor())?, fallback);
        assert_eq!(model.infer(&tensor())?, fallback);
        assert_eq!(model.calls(), 3);
        Ok(())
    }
}
