//! Pixel scaling and per-channel standardization.

use crate::core::constants::{IMAGENET_MEAN, IMAGENET_STD, PIXEL_SCALE};
use crate::core::inference::Tensor4D;
use crate::core::{ClassifyError, ClassifyResult};
use image::RgbImage;

/// Normalizes RGB images into a CHW `f32` tensor.
///
/// Each channel value `v` becomes `(v * scale - mean[c]) / std[c]`, evaluated
/// in that order so the result matches a tensor conversion followed by a
/// mean/std normalization step.
#[derive(Debug, Clone)]
pub struct NormalizeImage {
    /// Scaling factor applied to raw 8-bit values
    pub scale: f32,
    /// Mean values for each channel (RGB order)
    pub mean: [f32; 3],
    /// Standard deviation values for each channel (RGB order)
    pub std: [f32; 3],
}

impl NormalizeImage {
    /// Creates a new NormalizeImage instance.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// * Scale is not a positive finite number
    /// * Any mean value is not finite
    /// * Any standard deviation value is not a positive finite number
    pub fn new(scale: f32, mean: [f32; 3], std: [f32; 3]) -> ClassifyResult<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ClassifyError::config_error(format!(
                "Scale must be greater than 0, got {scale}"
            )));
        }

        for (i, &m) in mean.iter().enumerate() {
            if !m.is_finite() {
                return Err(ClassifyError::config_error(format!(
                    "Mean value at index {i} is not finite: {m}"
                )));
            }
        }

        for (i, &s) in std.iter().enumerate() {
            if !(s.is_finite() && s > 0.0) {
                return Err(ClassifyError::config_error(format!(
                    "Standard deviation at index {i} must be greater than 0, got {s}"
                )));
            }
        }

        Ok(Self { scale, mean, std })
    }

    /// The ImageNet normalization used by every supported model.
    pub fn imagenet() -> Self {
        Self {
            scale: PIXEL_SCALE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Normalizes a single image into a `(1, 3, height, width)` tensor.
    pub fn normalize_to(&self, img: &RgbImage) -> ClassifyResult<Tensor4D> {
        let (width, height) = img.dimensions();
        let (w, h) = (width as usize, height as usize);
        let plane = w * h;
        let mut result = vec![0.0f32; 3 * plane];

        for (x, y, pixel) in img.enumerate_pixels() {
            let offset = y as usize * w + x as usize;
            for c in 0..3 {
                let value = pixel[c] as f32 * self.scale;
                result[c * plane + offset] = (value - self.mean[c]) / self.std[c];
            }
        }

        Tensor4D::from_shape_vec((1, 3, h, w), result).map_err(|e| {
            ClassifyError::config_error(format!(
                "failed to create normalization tensor for {width}x{height} image: {e}"
            ))
        })
    }
}

impl Default for NormalizeImage {
    fn default() -> Self {
        Self::imagenet()
    }
}
