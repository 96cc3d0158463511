//! Frame pipeline.
//!
//! One iteration: capture → preprocess → infer → postprocess → render.
//! Frames are processed strictly one after another on the calling thread.
//! Any failure moves the pipeline to `Error` and ends the run; there is no
//! retry and no partial result.

use crate::detect::{DetectionModel, ModelShape};
use crate::error::{DetectError, Result};
use crate::frame::Frame;
use crate::ingest::{CaptureSession, CaptureSource};
use crate::postprocess::{DetectionSet, Postprocessor};
use crate::preprocess::Preprocessor;
use crate::render::Renderer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Preprocessing,
    Inferring,
    Postprocessing,
    Rendering,
    Done,
    Error,
}

/// Outcome of one processed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub detections: usize,
}

/// Outcome of a completed run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u32,
    pub detections: usize,
}

pub struct FramePipeline<'m> {
    model: &'m dyn DetectionModel,
    expected_shape: ModelShape,
    preprocessor: Preprocessor,
    postprocessor: Postprocessor,
    state: PipelineState,
}

impl<'m> FramePipeline<'m> {
    /// `expected_shape` is the configured model shape; outputs that differ
    /// are a configuration mismatch.
    pub fn new(
        model: &'m dyn DetectionModel,
        expected_shape: ModelShape,
        preprocessor: Preprocessor,
        postprocessor: Postprocessor,
    ) -> Self {
        Self {
            model,
            expected_shape,
            preprocessor,
            postprocessor,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        log::trace!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail<T>(&mut self, err: DetectError) -> Result<T> {
        log::error!("pipeline failed in {:?}: {}", self.state, err);
        self.transition(PipelineState::Error);
        Err(err)
    }

    /// Preprocess, infer and postprocess one frame.
    ///
    /// Boxes are rescaled to the frame's own dimensions, not the model input.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<DetectionSet> {
        self.transition(PipelineState::Preprocessing);
        let input = match self.preprocessor.preprocess(frame) {
            Ok(input) => input,
            Err(err) => return self.fail(err),
        };

        self.transition(PipelineState::Inferring);
        let predictions = match self.model.infer(&input) {
            Ok(predictions) => predictions,
            Err(err) => return self.fail(model_error(err)),
        };
        if let Err(err) = predictions.check_shape(self.expected_shape) {
            return self.fail(err);
        }

        self.transition(PipelineState::Postprocessing);
        let detections = match predictions.detections() {
            Ok(detections) => detections,
            Err(err) => return self.fail(err),
        };
        match self.postprocessor.process(detections, frame.size()) {
            Ok(set) => Ok(set),
            Err(err) => self.fail(err),
        }
    }

    /// Run one full iteration against `session`, ending in `Idle`.
    pub fn step<S, R>(
        &mut self,
        session: &mut CaptureSession<S>,
        renderer: &mut R,
    ) -> Result<FrameReport>
    where
        S: CaptureSource,
        R: Renderer + ?Sized,
    {
        self.transition(PipelineState::Capturing);
        let frame = match session.read_frame() {
            Ok(frame) => frame,
            Err(err) => return self.fail(err),
        };

        let detections = self.process_frame(&frame)?;
        log::debug!(
            "frame {} ({}): {} detection(s) kept",
            frame.index(),
            frame.size(),
            detections.len()
        );

        self.transition(PipelineState::Rendering);
        if let Err(err) = renderer.render(&frame, &detections) {
            return self.fail(DetectError::Render(err));
        }

        self.transition(PipelineState::Idle);
        Ok(FrameReport {
            frame_index: frame.index(),
            detections: detections.len(),
        })
    }

    /// Process `frames` frames, then finish in `Done`.
    pub fn run<S, R>(
        &mut self,
        session: &mut CaptureSession<S>,
        renderer: &mut R,
        frames: u32,
    ) -> Result<RunSummary>
    where
        S: CaptureSource,
        R: Renderer + ?Sized,
    {
        self.run_with(session, renderer, frames, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_frame` after every rendered frame.
    pub fn run_with<S, R, F>(
        &mut self,
        session: &mut CaptureSession<S>,
        renderer: &mut R,
        frames: u32,
        mut on_frame: F,
    ) -> Result<RunSummary>
    where
        S: CaptureSource,
        R: Renderer + ?Sized,
        F: FnMut(&FrameReport),
    {
        let mut summary = RunSummary::default();
        for _ in 0..frames {
            let report = self.step(session, renderer)?;
            summary.frames += 1;
            summary.detections += report.detections;
            on_frame(&report);
        }
        self.transition(PipelineState::Done);
        Ok(summary)
    }
}

/// Keep typed errors raised inside a backend, wrap everything else.
fn model_error(err: anyhow::Error) -> DetectError {
    match err.downcast::<DetectError>() {
        Ok(typed) => typed,
        Err(other) => DetectError::Model(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RawPredictions, StubModel};
    use crate::geometry::ImageSize;
    use crate::preprocess::ResizePolicy;

    const SHAPE: ModelShape = ModelShape {
        num_queries: 2,
        num_classes: 3,
    };

    fn frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![0u8; (width * height * 3) as usize], width, height, 1).unwrap()
    }

    fn stub(logits: Vec<f32>) -> StubModel {
        let boxes = vec![0.5, 0.5, 0.2, 0.4, 0.25, 0.25, 0.1, 0.1];
        StubModel::fixed(RawPredictions::new(SHAPE, logits, boxes).unwrap())
    }

    #[test]
    fn boxes_are_rescaled_to_original_frame_not_model_input() -> Result<()> {
        let model = stub(vec![6.0, 0.0, 0.0, 0.0, 0.0, 6.0]);
        let mut pipeline = FramePipeline::new(
            &model,
            SHAPE,
            Preprocessor::new(ResizePolicy::ShorterSide(24)),
            Postprocessor::default(),
        );

        let set = pipeline.process_frame(&frame(64, 48))?;
        assert_eq!(model.last_input_size(), Some(ImageSize::new(32, 24)));
        assert_eq!(pipeline.state(), PipelineState::Postprocessing);
        assert_eq!(set.len(), 1);
        assert_eq!(set.image_size(), ImageSize::new(64, 48));
        let b = set.pixel_boxes()[0];
        assert!((b.xmin - 25.6).abs() < 1e-3);
        assert!((b.ymax - 33.6).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn shape_mismatch_moves_to_error() {
        let model = stub(vec![0.0; 6]);
        let expected = ModelShape {
            num_queries: 100,
            num_classes: 92,
        };
        let mut pipeline = FramePipeline::new(
            &model,
            expected,
            Preprocessor::new(ResizePolicy::ShorterSide(8)),
            Postprocessor::default(),
        );
        assert!(matches!(
            pipeline.process_frame(&frame(8, 8)),
            Err(DetectError::ConfigMismatch(_))
        ));
        assert_eq!(pipeline.state(), PipelineState::Error);
    }

    #[test]
    fn typed_backend_errors_survive_model_boundary() {
        let typed = model_error(anyhow::Error::new(DetectError::MalformedOutput(
            "rank 2".to_string(),
        )));
        assert!(matches!(typed, DetectError::MalformedOutput(_)));

        let wrapped = model_error(anyhow::anyhow!("session crashed"));
        assert!(matches!(wrapped, DetectError::Model(_)));
    }
}
