//! DETR webcam detector
//!
//! Runs a DETR-style set-prediction model over frames captured from a
//! camera and renders the confident detections.
//!
//! # Pipeline
//!
//! capture → preprocess → infer → postprocess → render
//!
//! 1. **Capture**: one RGB frame from a V4L2 device, a synthetic source or
//!    still images. The frame's size is read from the delivered data.
//! 2. **Preprocess**: resize (shorter side to 800 by default), scale to
//!    [0,1] and normalise with the ImageNet mean/std into a 1×3×H×W tensor.
//! 3. **Infer**: the model returns per-slot class logits (last class is
//!    "no object") and normalised `(cx, cy, w, h)` boxes.
//! 4. **Postprocess**: softmax, keep slots whose best real-class
//!    probability is strictly above the threshold, convert boxes to corner
//!    form and rescale them to the original frame.
//! 5. **Render**: hand the frame and its (possibly empty) detection set to
//!    a renderer.
//!
//! # Module Structure
//!
//! - `geometry`, `postprocess`: box transforms and the confidence filter
//! - `preprocess`, `frame`: model input preparation
//! - `ingest`: capture sources and the scoped capture session
//! - `detect`: model boundary (stub and tract backends)
//! - `render`, `labels`: text and image output
//! - `pipeline`: the per-frame state machine
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod labels;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod render;

pub use config::AppConfig;
pub use detect::{load_model, DetectionModel, ModelShape, RawPredictions, StubModel};
pub use error::{DetectError, Result};
pub use frame::Frame;
pub use geometry::{to_corner_form, to_pixel_space, BoxCenterForm, BoxCornerForm, ImageSize};
pub use ingest::{open_source, CaptureSession, CaptureSource, ImageSequenceSource, V4l2Source};
pub use labels::Labels;
pub use pipeline::{FramePipeline, FrameReport, PipelineState, RunSummary};
pub use postprocess::{Detection, DetectionSet, Postprocessor, DEFAULT_CONFIDENCE_THRESHOLD};
pub use preprocess::{ImageTensor, Preprocessor, ResizePolicy};
pub use render::{OverlayRenderer, Renderer, RendererChain, TextRenderer};
