use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use detr_webcam::detect::{DetectionModel, ModelShape, RawPredictions, StubModel};
use detr_webcam::ingest::{CaptureSession, CaptureSource};
use detr_webcam::pipeline::{FramePipeline, PipelineState};
use detr_webcam::postprocess::{DetectionSet, Postprocessor};
use detr_webcam::preprocess::{ImageTensor, Preprocessor, ResizePolicy};
use detr_webcam::render::Renderer;
use detr_webcam::{BoxCornerForm, DetectError, Frame, ImageSize};

const COCO_SHAPE: ModelShape = ModelShape {
    num_queries: 2,
    num_classes: 92,
};

/// Capture source replaying prepared frames and counting releases.
struct ScriptedSource {
    frames: VecDeque<Frame>,
    released: Rc<Cell<u32>>,
}

impl ScriptedSource {
    fn new(count: u64, width: u32, height: u32) -> (Self, Rc<Cell<u32>>) {
        let released = Rc::new(Cell::new(0));
        let frames = (1..=count)
            .map(|index| {
                let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
                Frame::from_image(image, index).expect("frame")
            })
            .collect();
        (
            Self {
                frames,
                released: released.clone(),
            },
            released,
        )
    }
}

impl CaptureSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }

    fn release(&mut self) {
        self.released.set(self.released.get() + 1);
    }
}

#[derive(Debug)]
struct Rendered {
    frame_index: u64,
    frame_size: ImageSize,
    classes: Vec<usize>,
    boxes: Vec<BoxCornerForm>,
}

#[derive(Default)]
struct RecordingRenderer {
    calls: Vec<Rendered>,
    fail: bool,
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        if self.fail {
            return Err(anyhow!("display closed"));
        }
        self.calls.push(Rendered {
            frame_index: frame.index(),
            frame_size: frame.size(),
            classes: detections.iter().map(|d| d.class.class_id).collect(),
            boxes: detections.pixel_boxes(),
        });
        Ok(())
    }
}

/// Slot 0 predicts `class` at the frame centre, slot 1 predicts no object.
fn person_and_background(class: usize) -> RawPredictions {
    let nc = COCO_SHAPE.num_classes;
    let mut logits = vec![0.0f32; 2 * nc];
    logits[class] = 10.0;
    logits[nc + nc - 1] = 10.0;
    let boxes = vec![0.5, 0.5, 0.2, 0.4, 0.1, 0.1, 0.05, 0.05];
    RawPredictions::new(COCO_SHAPE, logits, boxes).expect("predictions")
}

fn only_background() -> RawPredictions {
    let nc = COCO_SHAPE.num_classes;
    let mut logits = vec![0.0f32; 2 * nc];
    logits[nc - 1] = 10.0;
    logits[2 * nc - 1] = 10.0;
    RawPredictions::new(COCO_SHAPE, logits, vec![0.5; 8]).expect("predictions")
}

fn pipeline(model: &dyn DetectionModel) -> FramePipeline<'_> {
    FramePipeline::new(
        model,
        COCO_SHAPE,
        Preprocessor::default(),
        Postprocessor::default(),
    )
}

fn assert_close(actual: BoxCornerForm, expected: [f32; 4]) {
    for (a, e) in actual.to_array().iter().zip(expected) {
        assert!((a - e).abs() < 1e-3, "{actual:?} != {expected:?}");
    }
}

#[test]
fn webcam_frames_yield_boxes_in_original_pixels() -> Result<()> {
    let model = StubModel::fixed(person_and_background(1));
    let (source, released) = ScriptedSource::new(2, 640, 480);
    let mut renderer = RecordingRenderer::default();
    {
        let mut session = CaptureSession::open(source)?;
        let mut pipeline = pipeline(&model);
        let summary = pipeline.run(&mut session, &mut renderer, 2)?;

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.detections, 2);
        assert_eq!(pipeline.state(), PipelineState::Done);
    }
    assert_eq!(released.get(), 1);

    // Shorter side 480 -> 800, longer side follows the aspect ratio.
    assert_eq!(model.last_input_size(), Some(ImageSize::new(1066, 800)));
    assert_eq!(model.calls(), 2);

    assert_eq!(renderer.calls.len(), 2);
    for (call, expected_index) in renderer.calls.iter().zip([1, 2]) {
        assert_eq!(call.frame_index, expected_index);
        assert_eq!(call.frame_size, ImageSize::new(640, 480));
        assert_eq!(call.classes, vec![1]);
        assert_close(call.boxes[0], [256.0, 144.0, 384.0, 336.0]);
    }
    Ok(())
}

#[test]
fn frames_without_detections_are_still_rendered() -> Result<()> {
    let model = StubModel::fixed(only_background());
    let (source, _released) = ScriptedSource::new(1, 64, 48);
    let mut session = CaptureSession::open(source)?;
    let mut renderer = RecordingRenderer::default();

    let summary = pipeline(&model).run(&mut session, &mut renderer, 1)?;

    assert_eq!(summary.detections, 0);
    assert_eq!(renderer.calls.len(), 1);
    assert!(renderer.calls[0].classes.is_empty());
    assert_eq!(renderer.calls[0].frame_size, ImageSize::new(64, 48));
    Ok(())
}

#[test]
fn exhausted_capture_ends_run_and_releases_device() -> Result<()> {
    let model = StubModel::fixed(person_and_background(3));
    let (source, released) = ScriptedSource::new(1, 64, 48);
    let mut renderer = RecordingRenderer::default();
    {
        let mut session = CaptureSession::open(source)?;
        let mut pipeline = pipeline(&model);
        let result = pipeline.run(&mut session, &mut renderer, 2);

        assert!(matches!(result, Err(DetectError::Capture(_))));
        assert_eq!(pipeline.state(), PipelineState::Error);
        assert_eq!(session.frames_read(), 1);
    }
    assert_eq!(renderer.calls.len(), 1);
    assert_eq!(renderer.calls[0].classes, vec![3]);
    assert_eq!(released.get(), 1);
    Ok(())
}

#[test]
fn mismatched_model_output_is_configuration_error() -> Result<()> {
    let small = ModelShape {
        num_queries: 1,
        num_classes: 3,
    };
    let model = StubModel::fixed(RawPredictions::new(
        small,
        vec![0.0, 0.0, 5.0],
        vec![0.5, 0.5, 0.1, 0.1],
    )?);
    let (source, _released) = ScriptedSource::new(1, 32, 32);
    let mut session = CaptureSession::open(source)?;
    let mut renderer = RecordingRenderer::default();

    let result = pipeline(&model).run(&mut session, &mut renderer, 1);

    assert!(matches!(result, Err(DetectError::ConfigMismatch(_))));
    assert!(renderer.calls.is_empty());
    Ok(())
}

#[test]
fn renderer_failure_is_reported_as_render_error() -> Result<()> {
    let model = StubModel::fixed(person_and_background(1));
    let (source, _released) = ScriptedSource::new(1, 32, 24);
    let mut session = CaptureSession::open(source)?;
    let mut renderer = RecordingRenderer {
        fail: true,
        ..RecordingRenderer::default()
    };

    let mut pipeline = pipeline(&model);
    let result = pipeline.run(&mut session, &mut renderer, 1);

    assert!(matches!(result, Err(DetectError::Render(_))));
    assert_eq!(pipeline.state(), PipelineState::Error);
    Ok(())
}

struct BrokenModel;

impl DetectionModel for BrokenModel {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn shape(&self) -> ModelShape {
        COCO_SHAPE
    }

    fn infer(&self, _input: &ImageTensor) -> Result<RawPredictions> {
        Err(DetectError::MalformedOutput("boxes tensor has rank 2".to_string()).into())
    }
}

#[test]
fn malformed_backend_output_keeps_its_error_kind() -> Result<()> {
    let (source, _released) = ScriptedSource::new(1, 16, 16);
    let mut session = CaptureSession::open(source)?;
    let mut renderer = RecordingRenderer::default();

    let model = BrokenModel;
    let mut pipeline = FramePipeline::new(
        &model,
        COCO_SHAPE,
        Preprocessor::new(ResizePolicy::ShorterSide(16)),
        Postprocessor::default(),
    );
    let result = pipeline.run(&mut session, &mut renderer, 1);

    assert!(matches!(result, Err(DetectError::MalformedOutput(_))));
    assert!(renderer.calls.is_empty());
    Ok(())
}
