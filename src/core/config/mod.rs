//! Configuration for the classification service.
//!
//! [`ServiceConfig`] is deserialized from JSON (or built in code with the
//! `with_*` methods) once at startup and handed to
//! [`ClassificationService`](crate::service::ClassificationService).

pub mod onnx;

pub use onnx::{OrtGraphOptimizationLevel, OrtSessionConfig};

use crate::core::constants::{
    DEFAULT_CLEANUP_GRACE_SECS, DEFAULT_CLEANUP_MAX_ATTEMPTS, DEFAULT_CLEANUP_RETRY_DELAY_MS,
    DEFAULT_LABELS_FILE, DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::core::{ClassifyError, ClassifyResult};
use crate::models::ModelId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing of deferred upload cleanup and the orphan sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Seconds between scheduling a cleanup and deleting the directory.
    pub grace_period_secs: u64,
    /// Deletion attempts before a cleanup task gives up.
    pub max_attempts: u32,
    /// Milliseconds to wait between failed deletion attempts.
    pub retry_delay_ms: u64,
    /// Seconds between janitor sweeps. Zero disables the periodic sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_CLEANUP_GRACE_SECS,
            max_attempts: DEFAULT_CLEANUP_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_CLEANUP_RETRY_DELAY_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl CleanupConfig {
    /// The grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// The retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// The sweep interval, or `None` when periodic sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Settings shared by every model session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Sessions created per model; requests are spread round-robin.
    pub session_pool_size: usize,
    /// ONNX Runtime session options.
    pub ort_session: OrtSessionConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            session_pool_size: 1,
            ort_session: OrtSessionConfig::default(),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Read-only directory holding the library images and the label table.
    pub image_dir: PathBuf,
    /// Label table location. Defaults to `<image_dir>/imagenet_labels.json`.
    pub labels_path: Option<PathBuf>,
    /// Directory holding `<model_id>.onnx` exports.
    pub models_dir: PathBuf,
    /// Models callers may request.
    pub allowed_models: Vec<ModelId>,
    /// Root under which per-upload session directories are created.
    pub upload_root: PathBuf,
    /// Deferred cleanup timing.
    pub cleanup: CleanupConfig,
    /// Model session settings.
    pub inference: InferenceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("static/imagenet_subset"),
            labels_path: None,
            models_dir: PathBuf::from("models"),
            allowed_models: vec![
                ModelId::ResNet18,
                ModelId::AlexNet,
                ModelId::Vgg16,
                ModelId::MobileNetV2,
            ],
            upload_root: std::env::temp_dir().join("img-classify-uploads"),
            cleanup: CleanupConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClassifyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifyError::config_error(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ClassifyError::config_error(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the image library directory.
    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }

    /// Overrides the label table location.
    pub fn with_labels_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.labels_path = Some(path.into());
        self
    }

    /// Sets the directory holding model exports.
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    /// Replaces the model allow-list.
    pub fn with_allowed_models(mut self, models: impl IntoIterator<Item = ModelId>) -> Self {
        self.allowed_models = models.into_iter().collect();
        self
    }

    /// Sets the root directory for upload sessions.
    pub fn with_upload_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_root = dir.into();
        self
    }

    /// Replaces the cleanup timing.
    pub fn with_cleanup(mut self, cleanup: CleanupConfig) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Replaces the inference settings.
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    /// The effective label table location.
    pub fn labels_path(&self) -> PathBuf {
        self.labels_path
            .clone()
            .unwrap_or_else(|| self.image_dir.join(DEFAULT_LABELS_FILE))
    }

    /// Checks the configuration for values the service cannot run with.
    pub fn validate(&self) -> ClassifyResult<()> {
        if self.allowed_models.is_empty() {
            return Err(ClassifyError::config_error(
                "allowed_models must list at least one model",
            ));
        }
        if self.inference.session_pool_size == 0 {
            return Err(ClassifyError::config_error(
                "inference.session_pool_size must be greater than 0",
            ));
        }
        if self.cleanup.max_attempts == 0 {
            return Err(ClassifyError::config_error(
                "cleanup.max_attempts must be greater than 0",
            ));
        }
        if self.upload_root.as_os_str().is_empty() {
            return Err(ClassifyError::config_error("upload_root must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.labels_path(),
            PathBuf::from("static/imagenet_subset/imagenet_labels.json")
        );
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{
                "image_dir": "/srv/images",
                "allowed_models": ["resnet18", "vgg16"],
                "cleanup": { "grace_period_secs": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.image_dir, PathBuf::from("/srv/images"));
        assert_eq!(
            config.allowed_models,
            vec![ModelId::ResNet18, ModelId::Vgg16]
        );
        assert_eq!(config.cleanup.grace_period(), Duration::from_secs(5));
        assert_eq!(config.cleanup.max_attempts, DEFAULT_CLEANUP_MAX_ATTEMPTS);
        assert_eq!(config.inference.session_pool_size, 1);
    }

    #[test]
    fn test_unknown_model_in_allow_list_is_rejected() {
        let result: Result<ServiceConfig, _> =
            serde_json::from_str(r#"{ "allowed_models": ["not_a_model"] }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_allow_list() {
        let config = ServiceConfig::default().with_allowed_models([]);
        assert!(matches!(
            config.validate(),
            Err(ClassifyError::Config { .. })
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "models_dir": "/opt/models" }"#).unwrap();

        let config = ServiceConfig::from_json_file(&path).unwrap();
        assert_eq!(config.models_dir, PathBuf::from("/opt/models"));

        let missing = ServiceConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ClassifyError::Config { .. })));
    }

    #[test]
    fn test_sweep_interval_zero_disables() {
        let cleanup = CleanupConfig {
            sweep_interval_secs: 0,
            ..CleanupConfig::default()
        };
        assert!(cleanup.sweep_interval().is_none());
    }
}
