use thiserror::Error;

/// Errors surfaced by the detection pipeline.
///
/// Every variant is fatal for the run: the pipeline performs no per-frame
/// recovery and no automatic retries.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The configured model shape does not match the loaded checkpoint.
    #[error("model configuration does not match checkpoint: {0}")]
    ConfigMismatch(String),

    /// The capture source returned no frame (exhausted or device fault).
    #[error("capture failed: {0}")]
    Capture(String),

    /// Malformed geometry or probability data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The model produced outputs of an unexpected shape.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("model inference failed")]
    Model(#[source] anyhow::Error),

    #[error("render failed")]
    Render(#[source] anyhow::Error),
}

pub type Result<T, E = DetectError> = std::result::Result<T, E>;
