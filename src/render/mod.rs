//! Renderer boundary.
//!
//! A renderer receives the original frame and the frame's detection set,
//! empty or not, once per processed frame. Each detection is drawn or
//! printed with its top class label and confidence, colored from a small
//! cycling palette.

mod overlay;

pub use overlay::OverlayRenderer;

use std::io::Write;

use anyhow::Result;

use crate::frame::Frame;
use crate::labels::{palette_color, Labels};
use crate::postprocess::{DetectionSet, KeptDetection};

pub trait Renderer {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        (**self).render(frame, detections)
    }
}

/// Label text drawn next to a box: `"{class}: {score:.2}"`.
pub fn label_text(labels: &Labels, kept: &KeptDetection) -> String {
    format!(
        "{}: {:.2}",
        labels.name(kept.class.class_id),
        kept.class.confidence
    )
}

/// Writes one line per detection to a text sink (stdout by default).
pub struct TextRenderer<W: Write> {
    labels: Labels,
    out: W,
}

impl TextRenderer<std::io::Stdout> {
    pub fn stdout(labels: Labels) -> Self {
        Self::new(labels, std::io::stdout())
    }
}

impl<W: Write> TextRenderer<W> {
    pub fn new(labels: Labels, out: W) -> Self {
        Self { labels, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        writeln!(
            self.out,
            "frame {} ({}): {} detection(s)",
            frame.index(),
            frame.size(),
            detections.len()
        )?;
        for (idx, kept) in detections.iter().enumerate() {
            let [r, g, b] = palette_color(idx);
            let px = kept.pixel_box;
            writeln!(
                self.out,
                "  {} at [{:.1}, {:.1}, {:.1}, {:.1}] #{:02x}{:02x}{:02x}",
                label_text(&self.labels, kept),
                px.xmin,
                px.ymin,
                px.xmax,
                px.ymax,
                r,
                g,
                b
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Fans one frame out to several renderers in order.
#[derive(Default)]
pub struct RendererChain {
    renderers: Vec<Box<dyn Renderer>>,
}

impl RendererChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<R: Renderer + 'static>(&mut self, renderer: R) {
        self.renderers.push(Box::new(renderer));
    }
}

impl Renderer for RendererChain {
    fn render(&mut self, frame: &Frame, detections: &DetectionSet) -> Result<()> {
        for renderer in &mut self.renderers {
            renderer.render(frame, detections)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoxCenterForm, ImageSize};
    use crate::postprocess::{Detection, Postprocessor};

    fn frame() -> Frame {
        Frame::from_rgb(vec![0u8; 640 * 480 * 3], 640, 480, 3).unwrap()
    }

    #[test]
    fn text_renderer_prints_label_score_and_box() -> Result<()> {
        let mut probs = vec![0.0f32; 92];
        probs[1] = 0.93;
        probs[91] = 0.07;
        let detections = vec![Detection::new(
            probs,
            BoxCenterForm::new(0.5, 0.5, 0.2, 0.4),
        )];
        let set = Postprocessor::default().process(detections, ImageSize::new(640, 480))?;

        let mut renderer = TextRenderer::new(Labels::coco(), Vec::new());
        renderer.render(&frame(), &set)?;
        let text = String::from_utf8(renderer.into_inner())?;

        assert!(text.starts_with("frame 3 (640x480): 1 detection(s)"));
        assert!(text.contains("person: 0.93 at [256.0, 144.0, 384.0, 336.0] #0072bd"));
        Ok(())
    }

    #[test]
    fn text_renderer_reports_empty_frames() -> Result<()> {
        let mut renderer = TextRenderer::new(Labels::coco(), Vec::new());
        renderer.render(&frame(), &DetectionSet::new(ImageSize::new(640, 480), Vec::new()))?;
        let text = String::from_utf8(renderer.into_inner())?;
        assert_eq!(text, "frame 3 (640x480): 0 detection(s)\n");
        Ok(())
    }
}
