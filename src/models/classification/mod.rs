//! ImageNet classifiers: identifiers, loading and labels.

pub mod labels;
pub mod model_id;
pub mod registry;

pub use labels::{LabelCatalog, LabelTable};
pub use model_id::ModelId;
pub use registry::{LoadedModel, ModelLoader, ModelRegistry, OnnxModelLoader};
