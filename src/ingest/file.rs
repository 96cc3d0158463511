//! Still-image frame source.
//!
//! Replays a single image file, or every `jpg`/`jpeg`/`png` file of a
//! directory in lexical order, then reports exhaustion.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::CaptureSource;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageSequenceSource {
    path: PathBuf,
    pending: VecDeque<PathBuf>,
    frame_count: u64,
}

impl ImageSequenceSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            pending: VecDeque::new(),
            frame_count: 0,
        }
    }

    /// Images not yet delivered.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

impl CaptureSource for ImageSequenceSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn connect(&mut self) -> Result<()> {
        let meta = std::fs::metadata(&self.path)
            .with_context(|| format!("open image source {}", self.path.display()))?;
        let mut files = if meta.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&self.path)
                .with_context(|| format!("list {}", self.path.display()))?
            {
                let path = entry?.path();
                if path.is_file() && is_image(&path) {
                    files.push(path);
                }
            }
            files
        } else {
            vec![self.path.clone()]
        };
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.path.display()));
        }
        files.sort();
        log::info!(
            "ImageSequenceSource: {} image(s) from {}",
            files.len(),
            self.path.display()
        );
        self.pending = files.into();
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let image = image::open(&path)
            .with_context(|| format!("decode image {}", path.display()))?
            .to_rgb8();
        self.frame_count += 1;
        Ok(Some(Frame::from_image(image, self.frame_count)?))
    }

    fn release(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn replays_directory_in_order_then_exhausts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::from_pixel(8, 6, Rgb([255, 0, 0])).save(dir.path().join("b.png"))?;
        RgbImage::from_pixel(4, 2, Rgb([0, 255, 0])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "skip me")?;

        let mut source = ImageSequenceSource::new(dir.path());
        source.connect()?;
        assert_eq!(source.remaining(), 2);

        let first = source.read_frame()?.expect("first frame");
        assert_eq!(first.size(), crate::geometry::ImageSize::new(4, 2));
        let second = source.read_frame()?.expect("second frame");
        assert_eq!(second.size(), crate::geometry::ImageSize::new(8, 6));
        assert_eq!(second.index(), 2);
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageSequenceSource::new(dir.path());
        assert!(source.connect().is_err());
        Ok(())
    }
}
