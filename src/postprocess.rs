//! Confidence filtering and box rescaling of raw model predictions.
//!
//! The last class slot of every probability distribution is the reserved
//! "no object" class. It never takes part in ranking a detection.

use crate::error::{DetectError, Result};
use crate::geometry::{to_corner_form, to_pixel_space, BoxCenterForm, BoxCornerForm, ImageSize};

/// Default keep threshold on the best non-background probability.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Numerically stable softmax over one row of logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// One query slot's prediction: class distribution plus normalized center-form box.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    class_probabilities: Vec<f32>,
    bbox: BoxCenterForm,
}

impl Detection {
    pub fn new(class_probabilities: Vec<f32>, bbox: BoxCenterForm) -> Self {
        Self {
            class_probabilities,
            bbox,
        }
    }

    /// Full distribution, background slot last.
    pub fn class_probabilities(&self) -> &[f32] {
        &self.class_probabilities
    }

    pub fn bbox(&self) -> BoxCenterForm {
        self.bbox
    }

    /// Best non-background class of this detection.
    pub fn top_class(&self) -> Result<ClassScore> {
        top_class(&self.class_probabilities)
    }
}

/// Winning class index and its probability.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassScore {
    pub class_id: usize,
    pub confidence: f32,
}

/// Argmax over every class except the trailing background slot.
///
/// Ties resolve to the lowest index. Fails when the distribution has fewer
/// than two entries.
pub fn top_class(probabilities: &[f32]) -> Result<ClassScore> {
    let Some((_, classes)) = probabilities.split_last() else {
        return Err(DetectError::InvalidInput(
            "empty class distribution".to_string(),
        ));
    };
    if classes.is_empty() {
        return Err(DetectError::InvalidInput(
            "class distribution needs at least one class besides background".to_string(),
        ));
    }

    let mut best = ClassScore {
        class_id: 0,
        confidence: classes[0],
    };
    for (class_id, &p) in classes.iter().enumerate().skip(1) {
        if p > best.confidence {
            best = ClassScore {
                class_id,
                confidence: p,
            };
        }
    }
    Ok(best)
}

/// One flag per detection, in input order: kept iff the best
/// non-background probability is strictly greater than `threshold`.
pub fn keep_mask(detections: &[Detection], threshold: f32) -> Result<Vec<bool>> {
    detections
        .iter()
        .map(|d| Ok(d.top_class()?.confidence > threshold))
        .collect()
}

/// Indices of kept detections, in input order.
pub fn filter(detections: &[Detection], threshold: f32) -> Result<Vec<usize>> {
    Ok(keep_mask(detections, threshold)?
        .into_iter()
        .enumerate()
        .filter_map(|(idx, keep)| keep.then_some(idx))
        .collect())
}

/// A detection that passed the filter, with its box in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct KeptDetection {
    /// Query slot the detection came from.
    pub slot: usize,
    pub detection: Detection,
    pub class: ClassScore,
    pub pixel_box: BoxCornerForm,
}

/// Filtered, rescaled detections for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionSet {
    size: ImageSize,
    items: Vec<KeptDetection>,
}

impl DetectionSet {
    pub fn new(size: ImageSize, items: Vec<KeptDetection>) -> Self {
        Self { size, items }
    }

    /// Size of the original frame the pixel boxes refer to.
    pub fn image_size(&self) -> ImageSize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeptDetection> {
        self.items.iter()
    }

    /// Real-class probabilities of kept detections; the no-object slot is dropped.
    pub fn class_probabilities(&self) -> Vec<&[f32]> {
        self.items
            .iter()
            .map(|k| {
                let probs = k.detection.class_probabilities();
                &probs[..probs.len().saturating_sub(1)]
            })
            .collect()
    }

    pub fn pixel_boxes(&self) -> Vec<BoxCornerForm> {
        self.items.iter().map(|k| k.pixel_box).collect()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a KeptDetection;
    type IntoIter = std::slice::Iter<'a, KeptDetection>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Confidence filter followed by the corner-form and pixel-space transforms.
#[derive(Clone, Copy, Debug)]
pub struct Postprocessor {
    pub confidence_threshold: f32,
}

impl Default for Postprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl Postprocessor {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Build the detection set for a frame of the given original size.
    pub fn process(&self, detections: Vec<Detection>, size: ImageSize) -> Result<DetectionSet> {
        let mask = keep_mask(&detections, self.confidence_threshold)?;
        let mut items = Vec::new();
        for ((slot, detection), keep) in detections.into_iter().enumerate().zip(mask) {
            if !keep {
                continue;
            }
            let class = detection.top_class()?;
            let pixel_box = to_pixel_space(to_corner_form(detection.bbox()), size)?;
            items.push(KeptDetection {
                slot,
                detection,
                class,
                pixel_box,
            });
        }
        Ok(DetectionSet::new(size, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(probs: &[f32]) -> Detection {
        Detection::new(probs.to_vec(), BoxCenterForm::new(0.5, 0.5, 0.2, 0.4))
    }

    #[test]
    fn background_slot_is_excluded_from_ranking() -> Result<()> {
        let detections = [det(&[0.1, 0.95])];
        assert_eq!(keep_mask(&detections, 0.7)?, vec![false]);
        assert_eq!(detections[0].top_class()?.confidence, 0.1);
        Ok(())
    }

    #[test]
    fn threshold_is_strict() -> Result<()> {
        let detections = [det(&[0.71, 0.29])];
        assert_eq!(filter(&detections, 0.7)?, vec![0]);
        assert!(filter(&detections, 0.71)?.is_empty());
        Ok(())
    }

    #[test]
    fn ties_pick_first_maximal_class() -> Result<()> {
        let best = top_class(&[0.5, 0.5, 0.1])?;
        assert_eq!(best.class_id, 0);
        assert_eq!(best.confidence, 0.5);
        Ok(())
    }

    #[test]
    fn filter_preserves_input_order() -> Result<()> {
        let detections = [
            det(&[0.9, 0.05, 0.05]),
            det(&[0.2, 0.2, 0.6]),
            det(&[0.05, 0.8, 0.15]),
        ];
        assert_eq!(filter(&detections, 0.7)?, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn distributions_shorter_than_two_are_rejected() {
        assert!(matches!(top_class(&[]), Err(DetectError::InvalidInput(_))));
        assert!(matches!(
            keep_mask(&[det(&[0.99])], 0.7),
            Err(DetectError::InvalidInput(_))
        ));
    }

    #[test]
    fn softmax_is_normalized_and_stable() {
        let probs = softmax(&[1000.0, 1000.0, 1000.0 - f32::ln(2.0)]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((probs[0] - 0.4).abs() < 1e-5);
        assert!((probs[2] - 0.2).abs() < 1e-5);
    }

    #[test]
    fn process_rescales_kept_boxes_to_original_frame() -> Result<()> {
        let detections = vec![det(&[0.05, 0.9, 0.05]), det(&[0.3, 0.3, 0.4])];
        let set = Postprocessor::default().process(detections, ImageSize::new(640, 480))?;
        assert_eq!(set.len(), 1);

        let kept = set.iter().next().unwrap();
        assert_eq!(kept.slot, 0);
        assert_eq!(kept.class.class_id, 1);
        let b = kept.pixel_box;
        assert!((b.xmin - 256.0).abs() < 1e-3);
        assert!((b.ymin - 144.0).abs() < 1e-3);
        assert!((b.xmax - 384.0).abs() < 1e-3);
        assert!((b.ymax - 336.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn process_keeps_exactly_the_filtered_slots() -> Result<()> {
        let detections = vec![
            det(&[0.9, 0.05, 0.05]),
            det(&[0.7, 0.1, 0.2]),
            det(&[0.2, 0.2, 0.6]),
            det(&[0.05, 0.8, 0.15]),
        ];
        let expected = filter(&detections, 0.7)?;
        let set = Postprocessor::new(0.7).process(detections, ImageSize::new(100, 100))?;
        let slots: Vec<usize> = set.iter().map(|k| k.slot).collect();
        assert_eq!(slots, expected);
        assert_eq!(slots, vec![0, 3]);
        Ok(())
    }

    #[test]
    fn class_probabilities_omit_background() -> Result<()> {
        let set = Postprocessor::default()
            .process(vec![det(&[0.05, 0.9, 0.05])], ImageSize::new(640, 480))?;
        assert_eq!(set.class_probabilities(), vec![&[0.05f32, 0.9][..]]);
        Ok(())
    }

    #[test]
    fn process_with_nothing_kept_is_empty() -> Result<()> {
        let set = Postprocessor::default()
            .process(vec![det(&[0.1, 0.9])], ImageSize::new(640, 480))?;
        assert!(set.is_empty());
        assert_eq!(set.image_size(), ImageSize::new(640, 480));
        Ok(())
    }
}
