use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use super::{label_text, Renderer};
use crate::frame::Frame;
use crate::geometry::BoxCornerForm;
use crate::labels::{palette_color, Labels};
use crate::postprocess::DetectionSet;

const LINE_WIDTH: i32 = 3;
const LABEL_SCALE: f32 = 18.0;
const LABEL_PADDING: u32 = 2;
const LABEL_BACKGROUND: [u8; 3] = [255, 255, 0];
const LABEL_TEXT: [u8; 3] = [0, 0, 0];
/// Approximate glyph cell used to size label tabs when no font is loaded.
const FALLBACK_GLYPH: (u32, u32) = (8, 14);

/// Draws boxes and label tabs onto a copy of the frame.
///
/// Annotated frames are written as `frame_NNNN.png` when an output
/// directory is set. Label text needs a TTF/OTF font; without one only the
/// tab is drawn.
pub struct OverlayRenderer {
    labels: Labels,
    font: Option<FontVec>,
    output_dir: Option<PathBuf>,
    last_written: Option<PathBuf>,
}

impl OverlayRenderer {
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            font: None,
            output_dir: None,
            last_written: None,
        }
    }

    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn with_output_dir(mut self, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        self.output_dir = Some(dir.to_path_buf());
        Ok(self)
    }

    /// Path of the most recently written annotated frame.
    pub fn last_written(&self) -> Option<&Path> {
        self.last_written.as_deref()
    }

    /// Copy of the frame with every detection drawn on it.
    pub fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> RgbImage {
        let mut canvas = frame.image().clone();
        for (idx, kept) in detections.iter().enumerate() {
            let color = Rgb(palette_color(idx));
            let Some((x, y, w, h)) = clip_to_canvas(&canvas, kept.pixel_box) else {
                log::debug!("box {:?} lies outside the frame", kept.pixel_box);
                continue;
            };

            for t in 0..LINE_WIDTH {
                let rect = Rect::at(x - t, y - t).of_size(w + 2 * t as u32, h + 2 * t as u32);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            let text = label_text(&self.labels, kept);
            self.draw_label(&mut canvas, x, y, &text);
        }
        canvas
    }

    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str) {
        let scale = PxScale::from(LABEL_SCALE);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, text),
            None => (
                FALLBACK_GLYPH.0 * text.chars().count() as u32,
                FALLBACK_GLYPH.1,
            ),
        };
        let tab_w = text_w + 2 * LABEL_PADDING;
        let tab_h = text_h + 2 * LABEL_PADDING;
        let tab_y = if y >= tab_h as i32 { y - tab_h as i32 } else { y };
        blend_rect(canvas, x, tab_y, tab_w, tab_h, LABEL_BACKGROUND);

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                Rgb(LABEL_TEXT),
                x + LABEL_PADDING as i32,
                tab_y + LABEL_PADDING as i32,
                scale,
                font,
                text,
            );
        }
    }
}

/// Box as `(x, y, w, h)` clipped to the canvas, `None` when nothing is visible.
fn clip_to_canvas(canvas: &RgbImage, b: BoxCornerForm) -> Option<(i32, i32, u32, u32)> {
    let clamp = |v: f32, max: u32| {
        if v.is_nan() {
            0.0
        } else {
            v.round().clamp(0.0, max as f32)
        }
    };
    let (cw, ch) = canvas.dimensions();
    let (x0, x1) = (clamp(b.xmin, cw), clamp(b.xmax, cw));
    let (y0, y1) = (clamp(b.ymin, ch), clamp(b.ymax, ch));
    if x0 >= cw as f32 || y0 >= ch as f32 || x1 <= 0.0 || y1 <= 0.0 {
        return None;
    }
    let w = (x1 - x0).max(1.0) as u32;
    let h = (y1 - y0).max(1.0) as u32;
    Some((x0 as i32, y0 as i32, w, h))
}

/// 50% blend of `color` over the clipped rectangle.
fn blend_rect(canvas: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: [u8; 3]) {
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    let x0 = (x as i64).clamp(0, cw);
    let y0 = (y as i64).clamp(0, ch);
    let x1 = (x as i64 + w as i64).clamp(0, cw);
    let y1 = (y as i64 + h as i64).clamp(0, ch);
    for py in y0..y1 {
        for px in x0..x1 {
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            for (channel, &c) in pixel.0.iter_mut().zip(color.iter()) {
                *channel = ((*channel as u16 + c as u16) / 2) as u8;
            }
        }
    }
}

impl Renderer for OverlayRenderer {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        let annotated = self.annotate(frame, detections);
        if let Some(dir) = &self.output_dir {
            let path = dir.join(format!("frame_{:04}.png", frame.index()));
            annotated
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::debug!("wrote annotated frame {}", path.display());
            self.last_written = Some(path);
        }
        Ok(())
    }
}
