//! Geometric preprocessing: short-side resize followed by a center crop.

use crate::core::constants::{CROP_SIZE, RESIZE_SHORT_SIDE};
use crate::core::{ClassifyError, ClassifyResult};
use image::{RgbImage, imageops::FilterType};

/// Resizes an image so its shorter side has a fixed length, keeping the
/// aspect ratio.
#[derive(Debug, Clone)]
pub struct ResizeShortSide {
    /// Target length of the shorter side.
    pub short_side: u32,
    /// Resampling filter.
    pub filter: FilterType,
}

impl Default for ResizeShortSide {
    fn default() -> Self {
        Self {
            short_side: RESIZE_SHORT_SIDE,
            filter: FilterType::Triangle,
        }
    }
}

impl ResizeShortSide {
    /// Computes the output `(width, height)` for an input of the given size.
    ///
    /// The long side is `trunc(short_side * long / short)`.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        let (short, long) = if width <= height {
            (width, height)
        } else {
            (height, width)
        };
        let new_long = (self.short_side as u64 * long as u64 / short as u64) as u32;
        if width <= height {
            (self.short_side, new_long)
        } else {
            (new_long, self.short_side)
        }
    }

    /// Applies the resize. Images already at the target size are returned as is.
    pub fn apply(&self, img: RgbImage) -> ClassifyResult<RgbImage> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ClassifyError::config_error(format!(
                "cannot resize an empty {width}x{height} image"
            )));
        }

        let (new_width, new_height) = self.output_size(width, height);
        if (new_width, new_height) == (width, height) {
            return Ok(img);
        }
        Ok(image::imageops::resize(
            &img, new_width, new_height, self.filter,
        ))
    }
}

/// Crops a centered square region.
#[derive(Debug, Clone)]
pub struct CenterCrop {
    /// Side length of the crop.
    pub size: u32,
}

impl Default for CenterCrop {
    fn default() -> Self {
        Self { size: CROP_SIZE }
    }
}

impl CenterCrop {
    /// Offset of the crop along one axis. Halves round to the nearest even
    /// integer.
    fn offset(dim: u32, size: u32) -> u32 {
        ((dim - size) as f64 / 2.0).round_ties_even() as u32
    }

    /// Applies the crop.
    ///
    /// # Errors
    ///
    /// Fails if either image side is shorter than the crop size. A preceding
    /// [`ResizeShortSide`] with `short_side >= size` guarantees this never happens.
    pub fn apply(&self, img: &RgbImage) -> ClassifyResult<RgbImage> {
        let (width, height) = img.dimensions();
        if width < self.size || height < self.size {
            return Err(ClassifyError::config_error(format!(
                "cannot crop {0}x{0} from a {width}x{height} image",
                self.size
            )));
        }

        let left = Self::offset(width, self.size);
        let top = Self::offset(height, self.size);
        Ok(image::imageops::crop_imm(img, left, top, self.size, self.size).to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_output_size_truncates_long_side() {
        let resize = ResizeShortSide::default();
        assert_eq!(resize.output_size(640, 480), (341, 256));
        assert_eq!(resize.output_size(480, 640), (256, 341));
        assert_eq!(resize.output_size(300, 300), (256, 256));
        assert_eq!(resize.output_size(10, 15), (256, 384));
    }

    #[test]
    fn test_apply_resizes_short_side() {
        let img = RgbImage::from_pixel(400, 200, Rgb([10, 20, 30]));
        let out = ResizeShortSide::default().apply(img).unwrap();
        assert_eq!(out.dimensions(), (512, 256));
    }

    #[test]
    fn test_apply_rejects_empty_image() {
        let img = RgbImage::new(0, 10);
        assert!(ResizeShortSide::default().apply(img).is_err());
    }

    #[test]
    fn test_center_crop_offsets_round_half_to_even() {
        assert_eq!(CenterCrop::offset(256, 224), 16);
        // 33 / 2 = 16.5 -> 16
        assert_eq!(CenterCrop::offset(257, 224), 16);
        // 35 / 2 = 17.5 -> 18
        assert_eq!(CenterCrop::offset(259, 224), 18);
        assert_eq!(CenterCrop::offset(224, 224), 0);
    }

    #[test]
    fn test_center_crop_takes_middle() {
        let mut img = RgbImage::from_pixel(6, 4, Rgb([0, 0, 0]));
        img.put_pixel(2, 1, Rgb([255, 0, 0]));

        let crop = CenterCrop { size: 2 };
        let out = crop.apply(&img).unwrap();
        assert_eq!(out.dimensions(), (2, 2));
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_center_crop_too_small() {
        let img = RgbImage::new(100, 300);
        assert!(CenterCrop::default().apply(&img).is_err());
    }
}
