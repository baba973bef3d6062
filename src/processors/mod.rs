//! Image preprocessing and output postprocessing.
//!
//! # Modules
//!
//! * `normalization` - Pixel scaling and per-channel standardization
//! * `resize` - Short-side resize and center crop
//! * `topk` - Softmax and top-k ranking of raw model scores

mod normalization;
mod resize;
pub mod topk;

pub use normalization::NormalizeImage;
pub use resize::{CenterCrop, ResizeShortSide};
pub use topk::{Topk, TopkResult, rank_descending, softmax_percent};

use crate::core::ClassifyResult;
use crate::core::inference::Tensor4D;
use image::DynamicImage;

/// The full evaluation transform: RGB conversion, resize, center crop and
/// normalization into a single-image NCHW batch.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    /// Short-side resize step
    pub resize: ResizeShortSide,
    /// Center crop step
    pub crop: CenterCrop,
    /// Normalization step
    pub normalize: NormalizeImage,
}

impl Preprocessor {
    /// Builds the model input tensor for one image.
    pub fn apply(&self, img: &DynamicImage) -> ClassifyResult<Tensor4D> {
        let rgb = img.to_rgb8();
        let resized = self.resize.apply(rgb)?;
        let cropped = self.crop.apply(&resized)?;
        self.normalize.normalize_to(&cropped)
    }
}
