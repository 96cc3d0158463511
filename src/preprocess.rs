//! Frame → model input tensor.
//!
//! Resize followed by per-channel normalization with the ImageNet statistics
//! the pretrained model was trained with. These constants are a contract with
//! the checkpoint: a mismatch does not fail, it silently degrades detections.

use image::imageops::{self, FilterType};

use crate::error::{DetectError, Result};
use crate::frame::Frame;
use crate::geometry::ImageSize;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub const DEFAULT_RESIZE_TARGET: u32 = 800;

/// How the frame is resized before inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Shorter side becomes `target`, aspect ratio kept.
    ShorterSide(u32),
    /// Longer side becomes `target`, aspect ratio kept.
    LongerSide(u32),
    /// Exact output size (models exported with a static input shape).
    Exact(ImageSize),
}

impl Default for ResizePolicy {
    fn default() -> Self {
        ResizePolicy::ShorterSide(DEFAULT_RESIZE_TARGET)
    }
}

impl ResizePolicy {
    /// Output size for a frame of `size`. The scaled side is truncated.
    pub fn target_size(&self, size: ImageSize) -> Result<ImageSize> {
        if size.is_empty() {
            return Err(DetectError::InvalidInput(format!(
                "cannot resize empty image {size}"
            )));
        }
        let (w, h) = (size.width as u64, size.height as u64);
        let out = match *self {
            ResizePolicy::ShorterSide(target) | ResizePolicy::LongerSide(target)
                if target == 0 =>
            {
                return Err(DetectError::InvalidInput(
                    "resize target must be positive".to_string(),
                ));
            }
            ResizePolicy::ShorterSide(target) => {
                let t = target as u64;
                if w <= h {
                    (t, t * h / w)
                } else {
                    (t * w / h, t)
                }
            }
            ResizePolicy::LongerSide(target) => {
                let t = target as u64;
                if w >= h {
                    (t, (t * h / w).max(1))
                } else {
                    ((t * w / h).max(1), t)
                }
            }
            ResizePolicy::Exact(target) => {
                if target.is_empty() {
                    return Err(DetectError::InvalidInput(format!(
                        "exact resize target must be positive, got {target}"
                    )));
                }
                return Ok(target);
            }
        };
        let width = u32::try_from(out.0)
            .map_err(|_| DetectError::InvalidInput("resized width overflows".to_string()))?;
        let height = u32::try_from(out.1)
            .map_err(|_| DetectError::InvalidInput("resized height overflows".to_string()))?;
        Ok(ImageSize::new(width, height))
    }
}

/// Model input: one image, channel-major (`[1, 3, height, width]`).
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    size: ImageSize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(size: ImageSize, data: Vec<f32>) -> Result<Self> {
        let expected = 3 * size.width as usize * size.height as usize;
        if data.len() != expected {
            return Err(DetectError::InvalidInput(format!(
                "tensor for {size} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { size, data })
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// NCHW shape with batch 1.
    pub fn shape(&self) -> [usize; 4] {
        [1, 3, self.size.height as usize, self.size.width as usize]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, channel: usize, y: usize, x: usize) -> f32 {
        let (w, h) = (self.size.width as usize, self.size.height as usize);
        self.data[channel * w * h + y * w + x]
    }
}

#[derive(Clone, Debug)]
pub struct Preprocessor {
    pub resize: ResizePolicy,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(ResizePolicy::default())
    }
}

impl Preprocessor {
    pub fn new(resize: ResizePolicy) -> Self {
        Self {
            resize,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Size of the tensor produced for a frame of `size`.
    pub fn input_size(&self, size: ImageSize) -> Result<ImageSize> {
        self.resize.target_size(size)
    }

    pub fn preprocess(&self, frame: &Frame) -> Result<ImageTensor> {
        let target = self.input_size(frame.size())?;
        let source = frame.image();
        let resized;
        let image = if target == frame.size() {
            source
        } else {
            resized = imageops::resize(source, target.width, target.height, FilterType::Triangle);
            &resized
        };

        let (w, h) = (target.width as usize, target.height as usize);
        let plane = w * h;
        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = y as usize * w + x as usize;
            for channel in 0..3 {
                let value = pixel.0[channel] as f32 / 255.0;
                data[channel * plane + offset] = (value - self.mean[channel]) / self.std[channel];
            }
        }
        ImageTensor::new(target, data)
    }
}
