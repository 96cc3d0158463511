//! Captured frames.
//!
//! A `Frame` owns the RGB pixels delivered by a capture source. Its
//! dimensions come from the delivered data, not from what was requested
//! from the device, so boxes are always rescaled to the frame as captured.

use image::RgbImage;

use crate::error::{DetectError, Result};
use crate::geometry::ImageSize;

pub struct Frame {
    image: RgbImage,
    /// Sequence number assigned by the capture source (1-based).
    index: u64,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| DetectError::InvalidInput("frame dimensions overflow".to_string()))?;
        if pixels.len() != expected {
            return Err(DetectError::InvalidInput(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            DetectError::InvalidInput(format!("cannot build {width}x{height} image"))
        })?;
        Self::from_image(image, index)
    }

    pub fn from_image(image: RgbImage, index: u64) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectError::InvalidInput(format!(
                "frame must not be empty, got {}x{}",
                image.width(),
                image.height()
            )));
        }
        Ok(Self { image, index })
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
