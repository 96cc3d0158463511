//! Box encodings and coordinate transforms.
//!
//! Model boxes arrive as normalized center-form `(cx, cy, w, h)` in `[0, 1]`.
//! They are converted to normalized corner form and then scaled into the
//! pixel space of the frame they were predicted for.

use crate::error::{DetectError, Result};

/// Box encoded by center and extent, relative to image width/height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxCenterForm {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// Box encoded by opposite corners. Normalized or pixel units depending on origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxCornerForm {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Dimensions of the source frame a set of boxes applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl BoxCenterForm {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Read a box from a `[cx, cy, w, h]` slot of a flat model output.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        match values {
            [cx, cy, w, h] => Ok(Self::new(*cx, *cy, *w, *h)),
            _ => Err(DetectError::InvalidInput(format!(
                "box requires 4 values, got {}",
                values.len()
            ))),
        }
    }
}

impl BoxCornerForm {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Convert `(cx, cy, w, h)` into `(xmin, ymin, xmax, ymax)`.
///
/// For `w, h >= 0` the result satisfies `xmin <= xmax` and `ymin <= ymax`.
pub fn to_corner_form(b: BoxCenterForm) -> BoxCornerForm {
    BoxCornerForm {
        xmin: b.cx - 0.5 * b.w,
        ymin: b.cy - 0.5 * b.h,
        xmax: b.cx + 0.5 * b.w,
        ymax: b.cy + 0.5 * b.h,
    }
}

/// Inverse of [`to_corner_form`].
pub fn to_center_form(b: BoxCornerForm) -> BoxCenterForm {
    BoxCenterForm {
        cx: 0.5 * (b.xmin + b.xmax),
        cy: 0.5 * (b.ymin + b.ymax),
        w: b.xmax - b.xmin,
        h: b.ymax - b.ymin,
    }
}

/// Scale a normalized corner-form box into pixel coordinates of `size`.
pub fn to_pixel_space(b: BoxCornerForm, size: ImageSize) -> Result<BoxCornerForm> {
    if size.is_empty() {
        return Err(DetectError::InvalidInput(format!(
            "image size must be positive, got {size}"
        )));
    }
    let w = size.width as f32;
    let h = size.height as f32;
    Ok(BoxCornerForm {
        xmin: b.xmin * w,
        ymin: b.ymin * h,
        xmax: b.xmax * w,
        ymax: b.ymax * h,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn assert_close(actual: BoxCornerForm, expected: [f32; 4], eps: f32) {
        for (a, e) in actual.to_array().iter().zip(expected.iter()) {
            assert!((a - e).abs() <= eps, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn corner_form_is_ordered_for_non_negative_extent() {
        let samples = [
            BoxCenterForm::new(0.5, 0.5, 0.2, 0.4),
            BoxCenterForm::new(0.0, 1.0, 0.0, 0.0),
            BoxCenterForm::new(0.1, 0.9, 1.0, 1.0),
            BoxCenterForm::new(0.73, 0.21, 0.05, 0.6),
        ];
        for b in samples {
            let c = to_corner_form(b);
            assert!(c.xmin <= c.xmax, "{c:?}");
            assert!(c.ymin <= c.ymax, "{c:?}");
        }
    }

    #[test]
    fn corner_center_corner_round_trip() {
        let original = BoxCornerForm::new(0.12, 0.3, 0.58, 0.91);
        let back = to_corner_form(to_center_form(original));
        assert_close(back, original.to_array(), EPS);
    }

    #[test]
    fn pixel_space_is_linear_in_image_size() -> Result<()> {
        let b = BoxCornerForm::new(0.13, 0.27, 0.61, 0.83);
        let single = to_pixel_space(b, ImageSize::new(640, 480))?;
        let double = to_pixel_space(b, ImageSize::new(1280, 960))?;
        assert_eq!(double.xmin, 2.0 * single.xmin);
        assert_eq!(double.ymin, 2.0 * single.ymin);
        assert_eq!(double.xmax, 2.0 * single.xmax);
        assert_eq!(double.ymax, 2.0 * single.ymax);
        Ok(())
    }

    #[test]
    fn pixel_space_rejects_zero_size() {
        let b = BoxCornerForm::new(0.1, 0.1, 0.2, 0.2);
        assert!(matches!(
            to_pixel_space(b, ImageSize::new(0, 480)),
            Err(DetectError::InvalidInput(_))
        ));
        assert!(matches!(
            to_pixel_space(b, ImageSize::new(640, 0)),
            Err(DetectError::InvalidInput(_))
        ));
    }

    #[test]
    fn centered_box_maps_to_expected_pixels() -> Result<()> {
        let corner = to_corner_form(BoxCenterForm::new(0.5, 0.5, 0.2, 0.4));
        assert_close(corner, [0.4, 0.3, 0.6, 0.7], EPS);

        let pixels = to_pixel_space(corner, ImageSize::new(640, 480))?;
        assert_close(pixels, [256.0, 144.0, 384.0, 336.0], 1e-3);
        Ok(())
    }

    #[test]
    fn from_slice_requires_four_values() {
        assert!(BoxCenterForm::from_slice(&[0.1, 0.2, 0.3]).is_err());
        let b = BoxCenterForm::from_slice(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(b, BoxCenterForm::new(0.1, 0.2, 0.3, 0.4));
    }
}
