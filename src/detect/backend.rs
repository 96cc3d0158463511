use anyhow::Result;

use crate::detect::result::RawPredictions;
use crate::preprocess::ImageTensor;

/// Output shape the model was configured with.
///
/// `num_classes` counts logits per query slot, including the trailing
/// no-object slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelShape {
    pub num_queries: usize,
    pub num_classes: usize,
}

impl std::fmt::Display for ModelShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} queries x {} classes",
            self.num_queries, self.num_classes
        )
    }
}

/// Opaque detection model: image tensor in, per-slot logits and boxes out.
///
/// Weights are loaded once before the frame loop and never change, so the
/// handle is shared by reference. Implementations that cache compiled plans
/// do so behind interior mutability.
pub trait DetectionModel {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Shape of the predictions this model emits.
    fn shape(&self) -> ModelShape;

    /// Run one forward pass.
    fn infer(&self, input: &ImageTensor) -> Result<RawPredictions>;
}

impl<M: DetectionModel + ?Sized> DetectionModel for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn shape(&self) -> ModelShape {
        (**self).shape()
    }

    fn infer(&self, input: &ImageTensor) -> Result<RawPredictions> {
        (**self).infer(input)
    }
}
