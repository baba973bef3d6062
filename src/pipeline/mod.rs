//! The classification pipeline module.
//!
//! This module combines the model registry, the label catalog, the image
//! resolver and the preprocessing chain into a single top-5 classifier.

mod classify;

// Re-export the pipeline components for easier access
pub use classify::{ClassificationPipeline, ClassificationResult, Prediction};

#[cfg(test)]
pub(crate) use classify::tests as fixtures;
