use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::ModelShape;
use crate::geometry::ImageSize;
use crate::postprocess::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::preprocess::{ResizePolicy, DEFAULT_RESIZE_TARGET};

const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_CHECKPOINT: &str = "outputs/checkpoint.onnx";
const DEFAULT_BACKBONE: &str = "resnet18";
const DEFAULT_ENC_LAYERS: usize = 6;
const DEFAULT_DEC_LAYERS: usize = 6;
const DEFAULT_DIM_FEEDFORWARD: usize = 2048;
const DEFAULT_HIDDEN_DIM: usize = 256;
const DEFAULT_NHEADS: usize = 8;
const DEFAULT_NUM_QUERIES: usize = 100;
const DEFAULT_NUM_CLASSES: usize = 91;
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 24;
const DEFAULT_FRAMES: u32 = 2;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    model: Option<ModelConfigFile>,
    capture: Option<CaptureConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    checkpoint: Option<PathBuf>,
    backbone: Option<String>,
    enc_layers: Option<usize>,
    dec_layers: Option<usize>,
    dim_feedforward: Option<usize>,
    hidden_dim: Option<usize>,
    nheads: Option<usize>,
    num_queries: Option<usize>,
    num_classes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    threshold: Option<f32>,
    frames: Option<u32>,
    /// `shorter`, `longer` or `exact`.
    resize_policy: Option<String>,
    resize_target: Option<u32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    output_dir: Option<PathBuf>,
    font: Option<PathBuf>,
    labels: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub capture: CaptureSettings,
    pub pipeline: PipelineSettings,
    pub render: RenderSettings,
}

/// Hyperparameters the checkpoint was produced with.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: String,
    pub checkpoint: PathBuf,
    pub backbone: String,
    pub enc_layers: usize,
    pub dec_layers: usize,
    pub dim_feedforward: usize,
    pub hidden_dim: usize,
    pub nheads: usize,
    pub num_queries: usize,
    /// Real classes; the model emits one extra no-object logit per slot.
    pub num_classes: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub threshold: f32,
    pub frames: u32,
    pub resize: ResizePolicy,
}

#[derive(Debug, Clone, Default)]
pub struct RenderSettings {
    pub output_dir: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub labels: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            checkpoint: PathBuf::from(DEFAULT_CHECKPOINT),
            backbone: DEFAULT_BACKBONE.to_string(),
            enc_layers: DEFAULT_ENC_LAYERS,
            dec_layers: DEFAULT_DEC_LAYERS,
            dim_feedforward: DEFAULT_DIM_FEEDFORWARD,
            hidden_dim: DEFAULT_HIDDEN_DIM,
            nheads: DEFAULT_NHEADS,
            num_queries: DEFAULT_NUM_QUERIES,
            num_classes: DEFAULT_NUM_CLASSES,
        }
    }
}

impl ModelSettings {
    /// Output shape implied by the hyperparameters (background slot included).
    pub fn shape(&self) -> ModelShape {
        ModelShape {
            num_queries: self.num_queries,
            num_classes: self.num_classes + 1,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

impl CaptureSettings {
    /// Frame size requested from the device (not guaranteed).
    pub fn requested_size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            frames: DEFAULT_FRAMES,
            resize: ResizePolicy::ShorterSide(DEFAULT_RESIZE_TARGET),
        }
    }
}

impl AppConfig {
    /// Defaults, then the JSON file named by `DETR_WEBCAM_CONFIG`, then
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETR_WEBCAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let m = file.model.unwrap_or_default();
        let defaults = ModelSettings::default();
        let model = ModelSettings {
            backend: m.backend.unwrap_or(defaults.backend),
            checkpoint: m.checkpoint.unwrap_or(defaults.checkpoint),
            backbone: m.backbone.unwrap_or(defaults.backbone),
            enc_layers: m.enc_layers.unwrap_or(defaults.enc_layers),
            dec_layers: m.dec_layers.unwrap_or(defaults.dec_layers),
            dim_feedforward: m.dim_feedforward.unwrap_or(defaults.dim_feedforward),
            hidden_dim: m.hidden_dim.unwrap_or(defaults.hidden_dim),
            nheads: m.nheads.unwrap_or(defaults.nheads),
            num_queries: m.num_queries.unwrap_or(defaults.num_queries),
            num_classes: m.num_classes.unwrap_or(defaults.num_classes),
        };

        let c = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            device: c.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            width: c.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
            height: c.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            fps: c.fps.unwrap_or(DEFAULT_CAPTURE_FPS),
        };

        let p = file.pipeline.unwrap_or_default();
        let target = p.resize_target.unwrap_or(DEFAULT_RESIZE_TARGET);
        let resize = match p.resize_policy.as_deref().unwrap_or("shorter") {
            "shorter" => ResizePolicy::ShorterSide(target),
            "longer" => ResizePolicy::LongerSide(target),
            "exact" => {
                let (Some(width), Some(height)) = (p.input_width, p.input_height) else {
                    return Err(anyhow!(
                        "resize_policy \"exact\" requires input_width and input_height"
                    ));
                };
                ResizePolicy::Exact(ImageSize::new(width, height))
            }
            other => {
                return Err(anyhow!(
                    "unknown resize_policy {:?} (expected shorter, longer or exact)",
                    other
                ))
            }
        };
        let pipeline = PipelineSettings {
            threshold: p.threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            frames: p.frames.unwrap_or(DEFAULT_FRAMES),
            resize,
        };

        let r = file.render.unwrap_or_default();
        let render = RenderSettings {
            output_dir: r.output_dir,
            font: r.font,
            labels: r.labels,
        };

        Ok(Self {
            model,
            capture,
            pipeline,
            render,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("DETR_WEBCAM_CHECKPOINT") {
            if !path.trim().is_empty() {
                self.model.checkpoint = PathBuf::from(path);
            }
        }
        if let Ok(device) = std::env::var("DETR_WEBCAM_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device;
            }
        }
        if let Ok(threshold) = std::env::var("DETR_WEBCAM_THRESHOLD") {
            self.pipeline.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETR_WEBCAM_THRESHOLD must be a number"))?;
        }
        if let Ok(frames) = std::env::var("DETR_WEBCAM_FRAMES") {
            self.pipeline.frames = frames
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETR_WEBCAM_FRAMES must be a positive integer"))?;
        }
        if let Ok(dir) = std::env::var("DETR_WEBCAM_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.render.output_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.pipeline.threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("threshold must be within [0, 1], got {}", threshold));
        }
        if self.pipeline.frames == 0 {
            return Err(anyhow!("frames must be >= 1"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!(
                "capture size must be positive, got {}",
                self.capture.requested_size()
            ));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be >= 1"));
        }
        match self.pipeline.resize {
            ResizePolicy::ShorterSide(0) | ResizePolicy::LongerSide(0) => {
                return Err(anyhow!("resize target must be >= 1"));
            }
            ResizePolicy::Exact(size) if size.is_empty() => {
                return Err(anyhow!("exact input size must be positive, got {}", size));
            }
            _ => {}
        }

        let m = &self.model;
        for (name, value) in [
            ("enc_layers", m.enc_layers),
            ("dec_layers", m.dec_layers),
            ("dim_feedforward", m.dim_feedforward),
            ("hidden_dim", m.hidden_dim),
            ("nheads", m.nheads),
            ("num_queries", m.num_queries),
            ("num_classes", m.num_classes),
        ] {
            if value == 0 {
                return Err(anyhow!("{} must be >= 1", name));
            }
        }
        if m.hidden_dim % m.nheads != 0 {
            return Err(anyhow!(
                "hidden_dim {} must be divisible by nheads {}",
                m.hidden_dim,
                m.nheads
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AppConfig {
        AppConfig::from_file(AppConfigFile::default()).unwrap()
    }

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = defaults();
        assert_eq!(cfg.capture.requested_size(), ImageSize::new(640, 480));
        assert_eq!(cfg.capture.fps, 24);
        assert_eq!(cfg.pipeline.threshold, 0.7);
        assert_eq!(cfg.pipeline.frames, 2);
        assert_eq!(cfg.pipeline.resize, ResizePolicy::ShorterSide(800));
        assert_eq!(
            cfg.model.shape(),
            ModelShape {
                num_queries: 100,
                num_classes: 92
            }
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_heads_not_dividing_hidden_dim() {
        let mut cfg = defaults();
        cfg.model.nheads = 7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = defaults();
        cfg.pipeline.threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.pipeline.threshold = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn exact_policy_requires_dimensions() {
        let file: AppConfigFile =
            serde_json::from_str(r#"{"pipeline": {"resize_policy": "exact"}}"#).unwrap();
        assert!(AppConfig::from_file(file).is_err());

        let file: AppConfigFile = serde_json::from_str(
            r#"{"pipeline": {"resize_policy": "exact", "input_width": 800, "input_height": 608}}"#,
        )
        .unwrap();
        let cfg = AppConfig::from_file(file).unwrap();
        assert_eq!(
            cfg.pipeline.resize,
            ResizePolicy::Exact(ImageSize::new(800, 608))
        );
    }
}
