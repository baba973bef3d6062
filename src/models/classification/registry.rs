//! Allow-listed, lazily populated cache of loaded classifiers.

use super::ModelId;
use crate::core::config::InferenceConfig;
use crate::core::inference::{ClassificationModel, OrtInfer};
use crate::core::{ClassifyError, ClassifyResult};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A loaded classifier shared by every request that uses it.
pub type LoadedModel = Arc<dyn ClassificationModel>;

/// Builds a ready-to-evaluate classifier for a model id.
pub trait ModelLoader: Send + Sync + std::fmt::Debug {
    /// Instantiates the architecture with its default pretrained weights.
    fn load(&self, id: ModelId) -> ClassifyResult<LoadedModel>;
}

/// Loads `<models_dir>/<model_id>.onnx` exports into ONNX Runtime sessions.
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    models_dir: PathBuf,
    inference: InferenceConfig,
}

impl OnnxModelLoader {
    /// Creates a loader reading exports from `models_dir`.
    pub fn new(models_dir: impl Into<PathBuf>, inference: InferenceConfig) -> Self {
        Self {
            models_dir: models_dir.into(),
            inference,
        }
    }

    /// Path of the export for `id`.
    pub fn model_path(&self, id: ModelId) -> PathBuf {
        self.models_dir.join(format!("{}.onnx", id.as_str()))
    }

    /// Directory the exports are read from.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, id: ModelId) -> ClassifyResult<LoadedModel> {
        let path = self.model_path(id);
        if !path.is_file() {
            return Err(ClassifyError::model_load(
                id.as_str(),
                &path,
                "weights file not found",
                None::<std::io::Error>,
            ));
        }
        let infer = OrtInfer::from_config(id.as_str(), &path, &self.inference)?;
        Ok(Arc::new(infer))
    }
}

type Slot = Arc<OnceCell<LoadedModel>>;

/// Maps model identifiers to loaded classifiers.
///
/// Only ids in the allow-list can be requested. Each id owns a one-time
/// initialization cell: concurrent first requests for the same id block on
/// that cell while one of them loads, and nobody ever sees a half-built model.
/// The map lock is only held to fetch or replace a cell, never while loading
/// or running a model.
#[derive(Debug)]
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    slots: RwLock<BTreeMap<ModelId, Slot>>,
}

impl ModelRegistry {
    /// Creates a registry allowing exactly `allowed`.
    pub fn new(loader: Arc<dyn ModelLoader>, allowed: impl IntoIterator<Item = ModelId>) -> Self {
        let slots = allowed
            .into_iter()
            .map(|id| (id, Arc::new(OnceCell::new())))
            .collect();
        Self {
            loader,
            slots: RwLock::new(slots),
        }
    }

    /// The allow-listed model ids, sorted.
    pub fn allowed(&self) -> Vec<ModelId> {
        self.read_slots().keys().copied().collect()
    }

    /// Parses `model_id` and checks it against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::UnknownModel`] for unknown or disallowed ids.
    pub fn resolve_id(&self, model_id: &str) -> ClassifyResult<ModelId> {
        let id: ModelId = model_id.parse()?;
        if self.read_slots().contains_key(&id) {
            Ok(id)
        } else {
            Err(ClassifyError::unknown_model(model_id))
        }
    }

    /// Returns the classifier for `model_id`, loading it on first use.
    ///
    /// # Errors
    ///
    /// * [`ClassifyError::UnknownModel`] if the id is unknown or not allowed.
    /// * [`ClassifyError::ModelLoad`] if loading fails. Failures are not
    ///   cached; a later call tries again.
    pub fn get_model(&self, model_id: &str) -> ClassifyResult<LoadedModel> {
        let id = self.resolve_id(model_id)?;
        self.get(id)
    }

    /// Same as [`ModelRegistry::get_model`] for an already parsed id.
    pub fn get(&self, id: ModelId) -> ClassifyResult<LoadedModel> {
        let slot = self
            .read_slots()
            .get(&id)
            .cloned()
            .ok_or_else(|| ClassifyError::unknown_model(id.as_str()))?;

        if let Some(model) = slot.get() {
            debug!("model '{id}' served from cache");
            return Ok(Arc::clone(model));
        }

        slot.get_or_try_init(|| {
            let started = Instant::now();
            info!("loading model '{id}'");
            let model = self.loader.load(id).inspect_err(|e| {
                warn!("failed to load model '{id}': {e}");
            })?;
            info!("model '{id}' ready in {:?}", started.elapsed());
            Ok(model)
        })
        .cloned()
    }

    /// Loads every id in `ids` in parallel, so first requests are not slow.
    ///
    /// Returns the ids that failed with their errors; successful loads stay
    /// cached.
    pub fn warm_up(&self, ids: &[ModelId]) -> Vec<(ModelId, ClassifyError)> {
        ids.par_iter()
            .filter_map(|&id| self.get(id).err().map(|e| (id, e)))
            .collect()
    }

    /// Drops the cached instance for `id`. The next request reloads it.
    ///
    /// Requests already holding the old instance keep using it until they
    /// finish. Returns whether an instance was cached.
    pub fn evict(&self, id: ModelId) -> bool {
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slots.get_mut(&id) {
            Some(slot) if slot.get().is_some() => {
                *slot = Arc::new(OnceCell::new());
                info!("evicted model '{id}'");
                true
            }
            _ => false,
        }
    }

    /// Ids that currently have a loaded instance.
    pub fn loaded_models(&self) -> Vec<ModelId> {
        self.read_slots()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(id, _)| *id)
            .collect()
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ModelId, Slot>> {
        // Nothing panics while holding this lock, but a poisoned map is still valid.
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::inference::{Tensor2D, Tensor4D};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic stand-in classifier.
    ///
    /// Class `i` scores `mean(channel i % 3) - 0.01 * (i / 3)`, so images of
    /// a dominant color rank the classes tied to that channel first.
    #[derive(Debug)]
    pub(crate) struct StubModel {
        pub(crate) name: String,
        pub(crate) num_classes: usize,
    }

    impl ClassificationModel for StubModel {
        fn forward(&self, batch: &Tensor4D) -> Result<Tensor2D, ClassifyError> {
            let batch_size = batch.shape()[0];
            let mut out = Tensor2D::zeros((batch_size, self.num_classes));
            for b in 0..batch_size {
                let means: Vec<f32> = (0..3)
                    .map(|c| {
                        let plane = batch.slice(ndarray::s![b, c, .., ..]);
                        plane.sum() / plane.len() as f32
                    })
                    .collect();
                for class in 0..self.num_classes {
                    out[[b, class]] = means[class % 3] - (class / 3) as f32 * 0.01;
                }
            }
            Ok(out)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// Loader that counts calls and can be told to fail.
    #[derive(Debug, Default)]
    pub(crate) struct StubLoader {
        pub(crate) loads: AtomicUsize,
        pub(crate) fail: std::sync::atomic::AtomicBool,
        pub(crate) num_classes: usize,
    }

    impl StubLoader {
        pub(crate) fn with_classes(num_classes: usize) -> Self {
            Self {
                num_classes,
                ..Self::default()
            }
        }
    }

    impl ModelLoader for StubLoader {
        fn load(&self, id: ModelId) -> ClassifyResult<LoadedModel> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClassifyError::model_load(
                    id.as_str(),
                    "stub.onnx",
                    "weights unavailable",
                    None::<std::io::Error>,
                ));
            }
            Ok(Arc::new(StubModel {
                name: id.as_str().to_string(),
                num_classes: self.num_classes,
            }))
        }
    }

    fn registry(loader: Arc<StubLoader>) -> ModelRegistry {
        ModelRegistry::new(loader, [ModelId::ResNet18, ModelId::AlexNet])
    }

    #[test]
    fn test_unknown_and_disallowed_ids() {
        let reg = registry(Arc::new(StubLoader::with_classes(10)));
        assert!(matches!(
            reg.get_model("not_a_model"),
            Err(ClassifyError::UnknownModel { .. })
        ));
        assert!(matches!(
            reg.get_model("vgg16"),
            Err(ClassifyError::UnknownModel { .. })
        ));
        assert!(matches!(
            reg.get_model(""),
            Err(ClassifyError::UnknownModel { .. })
        ));
    }

    #[test]
    fn test_model_is_loaded_once() {
        let loader = Arc::new(StubLoader::with_classes(10));
        let reg = registry(Arc::clone(&loader));

        let first = reg.get_model("resnet18").unwrap();
        let second = reg.get_model("resnet18").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(reg.loaded_models(), vec![ModelId::ResNet18]);
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let loader = Arc::new(StubLoader::with_classes(10));
        let reg = Arc::new(registry(Arc::clone(&loader)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.get_model("alexnet").unwrap())
            })
            .collect();
        let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let loader = Arc::new(StubLoader::with_classes(10));
        loader.fail.store(true, Ordering::SeqCst);
        let reg = registry(Arc::clone(&loader));

        assert!(matches!(
            reg.get_model("resnet18"),
            Err(ClassifyError::ModelLoad { .. })
        ));
        assert!(reg.loaded_models().is_empty());

        loader.fail.store(false, Ordering::SeqCst);
        assert!(reg.get_model("resnet18").is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_warm_up_and_evict() {
        let loader = Arc::new(StubLoader::with_classes(10));
        let reg = registry(Arc::clone(&loader));

        let failures = reg.warm_up(&[ModelId::ResNet18, ModelId::AlexNet, ModelId::Vgg16]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, ModelId::Vgg16);
        assert_eq!(reg.loaded_models().len(), 2);

        assert!(reg.evict(ModelId::ResNet18));
        assert!(!reg.evict(ModelId::ResNet18));
        assert_eq!(reg.loaded_models(), vec![ModelId::AlexNet]);

        reg.get_model("resnet18").unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_onnx_loader_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let loader = OnnxModelLoader::new(dir.path(), InferenceConfig::default());
        assert_eq!(
            loader.model_path(ModelId::ResNet18),
            dir.path().join("resnet18.onnx")
        );
        assert!(matches!(
            loader.load(ModelId::ResNet18),
            Err(ClassifyError::ModelLoad { .. })
        ));
    }
}
