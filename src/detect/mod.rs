//! Model boundary: the opaque detection model and its raw outputs.

pub mod backend;
pub mod backends;
pub mod result;

pub use backend::{DetectionModel, ModelShape};
pub use backends::StubModel;
#[cfg(feature = "backend-tract")]
pub use backends::TractModel;
pub use result::RawPredictions;

use crate::config::ModelSettings;
use crate::error::{DetectError, Result};
use crate::geometry::ImageSize;

/// Build the model handle named by `settings.backend`.
///
/// `input_hint` is the tensor size expected for the requested capture size;
/// backends that compile for a fixed shape verify the checkpoint against it.
pub fn load_model(
    settings: &ModelSettings,
    input_hint: ImageSize,
) -> Result<Box<dyn DetectionModel>> {
    let shape = settings.shape();
    log::info!(
        "building {} model: backbone={} enc_layers={} dec_layers={} hidden_dim={} nheads={} dim_feedforward={} ({})",
        settings.backend,
        settings.backbone,
        settings.enc_layers,
        settings.dec_layers,
        settings.hidden_dim,
        settings.nheads,
        settings.dim_feedforward,
        shape
    );
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubModel::demo(shape)?)),
        "tract" => load_tract(settings, input_hint),
        other => Err(DetectError::Config(format!(
            "unknown model backend '{other}' (expected tract or stub)"
        ))),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &ModelSettings, input_hint: ImageSize) -> Result<Box<dyn DetectionModel>> {
    let model = TractModel::load(&settings.checkpoint, settings.shape(), input_hint)?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(_settings: &ModelSettings, _input_hint: ImageSize) -> Result<Box<dyn DetectionModel>> {
    Err(DetectError::Config(
        "the tract backend requires the backend-tract feature".to_string(),
    ))
}
