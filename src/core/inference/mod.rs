//! Structures and helpers for model inference.
//!
//! [`ClassificationModel`] is the seam between the pipeline and whatever runs
//! the forward pass. [`OrtInfer`] implements it on top of a pool of ONNX
//! Runtime sessions.

pub mod ort_infer;

pub use ort_infer::OrtInfer;

use crate::core::ClassifyError;

/// Four-dimensional `f32` tensor (batch, channels, height, width).
pub type Tensor4D = ndarray::Array4<f32>;

/// Two-dimensional `f32` tensor (batch, classes).
pub type Tensor2D = ndarray::Array2<f32>;

/// A classifier in evaluation mode.
///
/// Implementations must be deterministic: the same input tensor always
/// produces the same scores. They are shared across threads, so any interior
/// state (such as a session pool) must handle its own synchronization.
pub trait ClassificationModel: Send + Sync + std::fmt::Debug {
    /// Runs the forward pass on an NCHW batch and returns one raw score
    /// vector per batch entry.
    fn forward(&self, batch: &Tensor4D) -> Result<Tensor2D, ClassifyError>;

    /// Name used in logs and error messages.
    fn name(&self) -> &str;
}
