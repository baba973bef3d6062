//! The classification service: shared state plus the operations callers use.
//!
//! [`ClassificationService`] owns the model registry, label catalog, image
//! library and upload manager. It is built once at startup and then shared
//! (by reference or `Arc`) across every request.

use crate::core::{ClassifyError, ClassifyResult, ServiceConfig};
use crate::models::{LabelCatalog, ModelLoader, ModelRegistry, OnnxModelLoader};
use crate::pipeline::{ClassificationPipeline, ClassificationResult};
use crate::upload::{CleanupHandle, CleanupScheduler, UploadManager};
use crate::utils::ImageLibrary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What the service can classify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Allow-listed model ids.
    pub models: Vec<String>,
    /// Images available in the shared library.
    pub images: Vec<String>,
}

/// A classified upload together with the pending removal of its session
/// directory.
#[derive(Debug)]
pub struct UploadClassification {
    /// The top-5 classes of the uploaded image.
    pub result: ClassificationResult,
    /// The scheduled cleanup; await it to observe the removal.
    pub cleanup: CleanupHandle,
}

/// Entry point for classification requests.
#[derive(Debug)]
pub struct ClassificationService {
    config: ServiceConfig,
    pipeline: Arc<ClassificationPipeline>,
    uploads: UploadManager,
    janitor: Option<JoinHandle<()>>,
}

impl ClassificationService {
    /// Starts the service with ONNX models read from `config.models_dir`.
    ///
    /// Must be called from within a Tokio runtime. Sweeps leftover upload
    /// directories before returning and starts the periodic janitor.
    pub async fn start(config: ServiceConfig) -> ClassifyResult<Self> {
        let loader = OnnxModelLoader::new(&config.models_dir, config.inference.clone());
        Self::with_loader(config, Arc::new(loader)).await
    }

    /// Same as [`ClassificationService::start`] with a custom model loader.
    pub async fn with_loader(
        config: ServiceConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> ClassifyResult<Self> {
        config.validate()?;

        let labels_path = config.labels_path();
        let registry = Arc::new(ModelRegistry::new(
            loader,
            config.allowed_models.iter().copied(),
        ));
        let labels = Arc::new(LabelCatalog::new(&labels_path));
        let library = ImageLibrary::new(&config.image_dir, labels_path);
        let pipeline = Arc::new(ClassificationPipeline::new(registry, labels, library)?);

        let scheduler = CleanupScheduler::new(config.cleanup.clone())?;
        let uploads = UploadManager::new(&config.upload_root, scheduler);
        tokio::fs::create_dir_all(uploads.root())
            .await
            .map_err(|e| ClassifyError::storage("create", uploads.root(), e))?;

        match uploads.sweep().await {
            Ok(n) => info!("startup sweep removed {n} upload dirs"),
            Err(e) => warn!("startup sweep failed: {e}"),
        }
        let janitor = uploads
            .scheduler()
            .spawn_janitor(uploads.root().to_path_buf());

        info!(
            "classification service ready with {} models",
            config.allowed_models.len()
        );
        Ok(Self {
            config,
            pipeline,
            uploads,
            janitor,
        })
    }

    /// The configuration the service was started with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The classification pipeline.
    pub fn pipeline(&self) -> &Arc<ClassificationPipeline> {
        &self.pipeline
    }

    /// The upload manager.
    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    /// Lists the allow-listed models and the library images.
    pub fn info(&self) -> ClassifyResult<ServiceInfo> {
        let models = self
            .pipeline
            .registry()
            .allowed()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect();
        let images = self.pipeline.library().list_images()?;
        Ok(ServiceInfo { models, images })
    }

    /// Loads every allow-listed model now. Failures are logged and returned.
    pub fn warm_up(&self) -> Vec<ClassifyError> {
        let registry = self.pipeline.registry();
        registry
            .warm_up(&registry.allowed())
            .into_iter()
            .map(|(id, e)| {
                warn!("warm-up of '{id}' failed: {e}");
                e
            })
            .collect()
    }

    /// Classifies a library image. Blocks for the duration of inference.
    pub fn classify(&self, model_id: &str, image_id: &str) -> ClassifyResult<ClassificationResult> {
        self.pipeline.classify(model_id, image_id, None)
    }

    /// Classifies a library image on the blocking thread pool.
    pub async fn classify_async(
        &self,
        model_id: &str,
        image_id: &str,
    ) -> ClassifyResult<ClassificationResult> {
        run_blocking(&self.pipeline, model_id, image_id, None).await
    }

    /// Stores an upload, classifies it and schedules its cleanup.
    ///
    /// The session directory is scheduled for removal whether classification
    /// succeeds or fails. On success the cleanup handle is returned with the
    /// result; on failure the cleanup still runs, and
    /// [`ClassificationService::shutdown`] waits for it.
    pub async fn classify_upload(
        &self,
        bytes: &[u8],
        filename: &str,
        model_id: &str,
    ) -> ClassifyResult<UploadClassification> {
        let guard = self.uploads.begin_upload(bytes, filename, model_id).await?;
        let session = guard.session();

        let result = match session.validate() {
            Ok(()) => {
                run_blocking(
                    &self.pipeline,
                    session.model_id(),
                    session.image_id(),
                    Some(session.dir().to_path_buf()),
                )
                .await
            }
            Err(e) => Err(e),
        };

        let cleanup = guard.finish();
        result.map(|result| UploadClassification { result, cleanup })
    }

    /// Stops the janitor and removes every pending upload directory now,
    /// without waiting out grace periods. Returns how many were drained.
    pub async fn shutdown(mut self) -> usize {
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
        self.uploads.scheduler().shutdown().await
    }
}

impl Drop for ClassificationService {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
    }
}

async fn run_blocking(
    pipeline: &Arc<ClassificationPipeline>,
    model_id: &str,
    image_id: &str,
    image_dir: Option<std::path::PathBuf>,
) -> ClassifyResult<ClassificationResult> {
    let pipeline = Arc::clone(pipeline);
    let (model, image) = (model_id.to_string(), image_id.to_string());
    tokio::task::spawn_blocking(move || pipeline.classify(&model, &image, image_dir.as_deref()))
        .await
        .map_err(|e| ClassifyError::inference(model_id, "classification task failed", e))?
}
