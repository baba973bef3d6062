//! Error types for the classification service.
//!
//! Every failure the pipeline, resolver, registry or upload manager can
//! produce is a variant of [`ClassifyError`]. Variants keep their kind intact
//! as they propagate so the calling layer can decide between a caller-input
//! response and an internal-failure response.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenient result alias for classification operations.
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Enum representing the errors that can occur while classifying an image.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The requested model id is not a known architecture or not in the allow-list.
    #[error("unknown model '{model_id}'")]
    UnknownModel {
        /// The identifier as supplied by the caller.
        model_id: String,
    },

    /// A known model could not be instantiated.
    #[error("failed to load model '{model_id}' from {}: {context}", path.display())]
    ModelLoad {
        /// The identifier of the model being loaded.
        model_id: String,
        /// Location of the weights that were being loaded.
        path: PathBuf,
        /// What went wrong.
        context: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The label table is missing or malformed.
    #[error("failed to load labels from {}: {message}", path.display())]
    LabelLoad {
        /// Location of the label table.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The image identifier is empty or tries to escape its directory.
    #[error("invalid image id '{image_id}': {reason}")]
    InvalidImageId {
        /// The identifier as supplied by the caller.
        image_id: String,
        /// Which rule the identifier violated.
        reason: &'static str,
    },

    /// No file exists for the image identifier.
    #[error("image not found at {}", path.display())]
    ImageNotFound {
        /// The resolved path that was looked up.
        path: PathBuf,
    },

    /// The file exists but is not a decodable image.
    #[error("failed to decode image at {}", path.display())]
    ImageDecode {
        /// The resolved path of the image.
        path: PathBuf,
        /// The decoder error.
        #[source]
        source: image::ImageError,
    },

    /// An upload failed validation. Lists every violated rule.
    #[error("validation failed: {}", violations.join("; "))]
    Validation {
        /// Human-readable description of each violated rule.
        violations: Vec<String>,
    },

    /// Creating, writing or deleting upload storage failed.
    #[error("storage {operation} failed for {}", path.display())]
    Storage {
        /// The storage operation that failed.
        operation: &'static str,
        /// The path the operation targeted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The forward pass or its output handling failed.
    #[error("inference with model '{model_id}' failed: {context}")]
    Inference {
        /// The identifier of the model that was running.
        model_id: String,
        /// What went wrong.
        context: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    Config {
        /// A message describing the configuration error.
        message: String,
    },
}

impl ClassifyError {
    /// Creates a [`ClassifyError::UnknownModel`].
    pub fn unknown_model(model_id: impl Into<String>) -> Self {
        Self::UnknownModel {
            model_id: model_id.into(),
        }
    }

    /// Creates a [`ClassifyError::ModelLoad`] with an optional underlying error.
    pub fn model_load(
        model_id: impl Into<String>,
        path: impl AsRef<Path>,
        context: impl Into<String>,
        source: Option<impl std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        Self::ModelLoad {
            model_id: model_id.into(),
            path: path.as_ref().to_path_buf(),
            context: context.into(),
            source: source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        }
    }

    /// Creates a [`ClassifyError::LabelLoad`].
    pub fn label_load(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::LabelLoad {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a [`ClassifyError::InvalidImageId`].
    pub fn invalid_image_id(image_id: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidImageId {
            image_id: image_id.into(),
            reason,
        }
    }

    /// Creates a [`ClassifyError::Storage`].
    pub fn storage(operation: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Storage {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a [`ClassifyError::Inference`] wrapping an underlying error.
    pub fn inference(
        model_id: impl Into<String>,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_id: model_id.into(),
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a [`ClassifyError::Inference`] with no underlying error.
    pub fn inference_message(model_id: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Inference {
            model_id: model_id.into(),
            context: context.into(),
            source: None,
        }
    }

    /// Creates a [`ClassifyError::Config`].
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true when the error was caused by the caller's input.
    ///
    /// A web layer maps these to a 4xx response and re-renders the input form;
    /// everything else is an internal failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel { .. }
                | Self::InvalidImageId { .. }
                | Self::ImageNotFound { .. }
                | Self::Validation { .. }
        )
    }

    /// Message safe to show to an end user.
    ///
    /// Caller-input errors describe what was wrong. Internal errors collapse to
    /// a generic message so no filesystem paths or backend details leak.
    pub fn public_message(&self) -> String {
        match self {
            Self::UnknownModel { model_id } => format!("Unknown model: {model_id}"),
            Self::InvalidImageId { image_id, reason } => {
                format!("Invalid image id '{image_id}': {reason}")
            }
            Self::ImageNotFound { path } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("Image not found: {name}")
            }
            Self::Validation { violations } => violations.join(". "),
            _ => "Classification failed, please try again later".to_string(),
        }
    }
}
