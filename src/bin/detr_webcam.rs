//! detr_webcam - run a DETR checkpoint over webcam frames
//!
//! 1. Loads configuration (file, environment, then CLI flags)
//! 2. Builds the model once from the checkpoint
//! 3. Opens the capture device for the duration of the run
//! 4. Processes a fixed number of frames, printing detections to stdout
//!    and optionally writing annotated PNGs
//! 5. Releases the device on every exit path

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use detr_webcam::{
    load_model, open_source, AppConfig, CaptureSession, FramePipeline, Labels, OverlayRenderer,
    Postprocessor, Preprocessor, RendererChain, TextRenderer,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Model checkpoint (ONNX export of the trained detector).
    #[arg(long, env = "DETR_WEBCAM_CHECKPOINT")]
    checkpoint: Option<PathBuf>,
    /// Inference backend (tract|stub).
    #[arg(long)]
    backend: Option<String>,
    /// Capture device: /dev/videoN, stub://name, an image file or a directory of images.
    #[arg(long, env = "DETR_WEBCAM_DEVICE")]
    device: Option<String>,
    /// Minimum class probability; a detection is kept only when strictly above it.
    #[arg(long)]
    threshold: Option<f32>,
    /// Number of frames to process before exiting.
    #[arg(long)]
    frames: Option<u32>,
    /// Directory for annotated frames (frame_NNNN.png).
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// TTF/OTF font used for label text on annotated frames.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Class names file, one per line, indexed by class id.
    #[arg(long)]
    labels: Option<PathBuf>,
    #[arg(long)]
    num_queries: Option<usize>,
    /// Number of real classes (the no-object slot is added on top).
    #[arg(long)]
    num_classes: Option<usize>,
    #[arg(long)]
    enc_layers: Option<usize>,
    #[arg(long)]
    dec_layers: Option<usize>,
    #[arg(long)]
    hidden_dim: Option<usize>,
    #[arg(long)]
    nheads: Option<usize>,
    #[arg(long)]
    dim_feedforward: Option<usize>,
    #[arg(long)]
    backbone: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn apply(self, cfg: &mut AppConfig) {
        let model = &mut cfg.model;
        if let Some(v) = self.checkpoint {
            model.checkpoint = v;
        }
        if let Some(v) = self.backend {
            model.backend = v;
        }
        if let Some(v) = self.backbone {
            model.backbone = v;
        }
        if let Some(v) = self.num_queries {
            model.num_queries = v;
        }
        if let Some(v) = self.num_classes {
            model.num_classes = v;
        }
        if let Some(v) = self.enc_layers {
            model.enc_layers = v;
        }
        if let Some(v) = self.dec_layers {
            model.dec_layers = v;
        }
        if let Some(v) = self.hidden_dim {
            model.hidden_dim = v;
        }
        if let Some(v) = self.nheads {
            model.nheads = v;
        }
        if let Some(v) = self.dim_feedforward {
            model.dim_feedforward = v;
        }
        if let Some(v) = self.device {
            cfg.capture.device = v;
        }
        if let Some(v) = self.threshold {
            cfg.pipeline.threshold = v;
        }
        if let Some(v) = self.frames {
            cfg.pipeline.frames = v;
        }
        if self.output_dir.is_some() {
            cfg.render.output_dir = self.output_dir;
        }
        if self.font.is_some() {
            cfg.render.font = self.font;
        }
        if self.labels.is_some() {
            cfg.render.labels = self.labels;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::new(ui::UiMode::parse(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = AppConfig::load()?;
        args.apply(&mut cfg);
        cfg.validate()?;
        cfg
    };

    let preprocessor = Preprocessor::new(cfg.pipeline.resize);
    let input_hint = preprocessor.input_size(cfg.capture.requested_size())?;

    let model = {
        let _stage = ui.stage("Load model");
        load_model(&cfg.model, input_hint)?
    };
    log::info!("model ready: {} ({})", model.name(), model.shape());

    let labels = match &cfg.render.labels {
        Some(path) => Labels::from_file(path)?,
        None => Labels::coco(),
    };
    let mut renderers = RendererChain::new();
    renderers.push(TextRenderer::stdout(labels.clone()));
    if let Some(dir) = &cfg.render.output_dir {
        let mut overlay = OverlayRenderer::new(labels).with_output_dir(dir)?;
        if let Some(font) = &cfg.render.font {
            overlay = overlay.with_font_file(font)?;
        }
        log::info!("annotated frames will be written to {}", dir.display());
        renderers.push(overlay);
    }

    let mut session = {
        let _stage = ui.stage("Open capture device");
        let source = open_source(&cfg.capture)
            .with_context(|| format!("cannot use capture device {}", cfg.capture.device))?;
        CaptureSession::open(source)?
    };

    let mut pipeline = FramePipeline::new(
        model.as_ref(),
        cfg.model.shape(),
        preprocessor,
        Postprocessor::new(cfg.pipeline.threshold),
    );
    let progress = ui.frames(cfg.pipeline.frames);
    let summary = pipeline.run_with(
        &mut session,
        &mut renderers,
        cfg.pipeline.frames,
        |report| progress.frame_done(report.frame_index, report.detections),
    );
    progress.finish();
    let summary = summary?;

    log::info!(
        "processed {} frame(s), {} detection(s) above {}",
        summary.frames,
        summary.detections,
        cfg.pipeline.threshold
    );
    Ok(())
}
