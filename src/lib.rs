//! # img-classify
//!
//! Top-5 ImageNet classification over pretrained ONNX models, with managed
//! storage for uploaded images.
//!
//! ## Features
//!
//! - Allow-listed model registry with lazy, one-time loading per model
//! - Standard ImageNet evaluation transform (resize 256, center crop 224, normalize)
//! - Softmax confidences as percentages, ranked with deterministic tie-breaking
//! - Path-checked image resolution from a shared library or an upload session
//! - Per-upload session directories removed in the background after a grace period
//! - Periodic sweep of abandoned upload directories
//!
//! ## Modules
//!
//! * [`core`] - Configuration, constants, errors and the ONNX Runtime wrapper
//! * [`models`] - Model identifiers, the registry and the label catalog
//! * [`processors`] - Preprocessing and top-k ranking
//! * [`pipeline`] - The classification pipeline
//! * [`upload`] - Upload sessions, deferred cleanup and the janitor
//! * [`service`] - The service tying everything together
//! * [`utils`] - Image resolution and logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img_classify::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::new()
//!     .with_image_dir("static/imagenet_subset")
//!     .with_models_dir("models")
//!     .with_allowed_models([ModelId::ResNet18, ModelId::MobileNetV2]);
//!
//! let service = ClassificationService::start(config).await?;
//! let result = service.classify_async("resnet18", "cat.jpg").await?;
//! for prediction in result.iter() {
//!     println!("{}: {:.2}%", prediction.label, prediction.score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### JSON Configuration
//!
//! ```rust,no_run
//! use img_classify::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: ServiceConfig = serde_json::from_str(r#"
//! {
//!   "image_dir": "static/imagenet_subset",
//!   "models_dir": "models",
//!   "allowed_models": ["resnet18", "alexnet", "vgg16", "mobilenet_v2"],
//!   "upload_root": "/tmp/img-classify-uploads",
//!   "cleanup": { "grace_period_secs": 30, "sweep_interval_secs": 300 },
//!   "inference": { "session_pool_size": 2 }
//! }
//! "#)?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod core;
pub mod models;

pub mod pipeline;
pub mod processors;
pub mod service;
pub mod upload;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use img_classify::prelude::*;
/// ```
///
/// Included items cover the common path: configuring and starting the
/// service, reading results and handling errors. For custom model loaders or
/// direct use of the pipeline, import from `img_classify::models` and
/// `img_classify::pipeline`.
pub mod prelude {
    pub use crate::core::{ClassifyError, ClassifyResult, CleanupConfig, ServiceConfig};
    pub use crate::models::ModelId;
    pub use crate::pipeline::{ClassificationResult, Prediction};
    pub use crate::service::{ClassificationService, ServiceInfo, UploadClassification};
    pub use crate::utils::init_tracing;
}
