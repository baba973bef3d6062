//! The core module of the classification service.
//!
//! This module contains the fundamental components shared by every stage:
//! - Configuration management
//! - Constants used throughout the pipeline
//! - Error handling
//! - Inference engine integration

pub mod config;
pub mod constants;
pub mod errors;
pub mod inference;

pub use crate::utils::init_tracing;
pub use config::{CleanupConfig, InferenceConfig, ServiceConfig};
pub use errors::{ClassifyError, ClassifyResult};
pub use inference::{ClassificationModel, OrtInfer, Tensor2D, Tensor4D};
