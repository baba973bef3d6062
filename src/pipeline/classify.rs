//! Image classification: resolve, preprocess, infer, rank.

use crate::core::constants::TOP_K;
use crate::core::{ClassifyError, ClassifyResult};
use crate::models::{LabelCatalog, ModelRegistry};
use crate::processors::{Preprocessor, Topk};
use crate::utils::ImageLibrary;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One ranked class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "(String, f32)", from = "(String, f32)")]
pub struct Prediction {
    /// Human-readable class name.
    pub label: String,
    /// Softmax confidence as a percentage in [0, 100].
    pub score: f32,
}

impl From<Prediction> for (String, f32) {
    fn from(p: Prediction) -> Self {
        (p.label, p.score)
    }
}

impl From<(String, f32)> for Prediction {
    fn from((label, score): (String, f32)) -> Self {
        Self { label, score }
    }
}

/// The top-5 classes for one image, best first.
///
/// Serializes as a JSON array of `[label, score]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationResult {
    /// Predictions ordered by non-increasing score.
    pub predictions: Vec<Prediction>,
}

impl ClassificationResult {
    /// The highest-ranked prediction.
    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    /// Iterates over the predictions, best first.
    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.predictions.iter()
    }

    /// Number of predictions.
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// True when there are no predictions.
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Classifies images against registry models.
///
/// Holds no per-request state; one instance serves concurrent callers.
#[derive(Debug)]
pub struct ClassificationPipeline {
    registry: Arc<ModelRegistry>,
    labels: Arc<LabelCatalog>,
    library: ImageLibrary,
    preprocessor: Preprocessor,
    topk: Topk,
}

impl ClassificationPipeline {
    /// Creates a pipeline with the standard evaluation transform and top-5 ranking.
    pub fn new(
        registry: Arc<ModelRegistry>,
        labels: Arc<LabelCatalog>,
        library: ImageLibrary,
    ) -> ClassifyResult<Self> {
        let topk = Topk::new(TOP_K).map_err(ClassifyError::config_error)?;
        Ok(Self {
            registry,
            labels,
            library,
            preprocessor: Preprocessor::default(),
            topk,
        })
    }

    /// The model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The label catalog.
    pub fn labels(&self) -> &Arc<LabelCatalog> {
        &self.labels
    }

    /// The image resolver.
    pub fn library(&self) -> &ImageLibrary {
        &self.library
    }

    /// Returns the top-5 classes of `image_id` under `model_id`.
    ///
    /// The image is looked up in `image_dir` when given, else in the library.
    /// The model is resolved before any image I/O, so an unknown model fails
    /// without touching the filesystem. The decoded image is released on every
    /// path, success or failure.
    ///
    /// # Errors
    ///
    /// Propagates the registry, resolver, label and inference errors unchanged.
    pub fn classify(
        &self,
        model_id: &str,
        image_id: &str,
        image_dir: Option<&Path>,
    ) -> ClassifyResult<ClassificationResult> {
        let started = Instant::now();
        let model = self.registry.get_model(model_id)?;

        let handle = self.library.resolve(image_id, image_dir)?;
        let input = self.preprocessor.apply(handle.image());
        handle.close();
        let input = input?;

        let logits = model.forward(&input)?;
        if logits.nrows() != 1 {
            return Err(ClassifyError::inference_message(
                model_id,
                format!("expected one score vector, got {}", logits.nrows()),
            ));
        }
        let scores = logits.row(0).to_vec();

        let labels = self.labels.labels()?;
        if scores.len() > labels.len() {
            return Err(ClassifyError::inference_message(
                model_id,
                format!(
                    "model produced {} class scores but the label table has {} entries",
                    scores.len(),
                    labels.len()
                ),
            ));
        }

        let ranked = self
            .topk
            .process(&scores)
            .map_err(|e| ClassifyError::inference_message(model_id, e))?;
        let predictions = ranked
            .indexes
            .iter()
            .zip(&ranked.scores)
            .map(|(&idx, &score)| Prediction {
                label: labels[idx].clone(),
                score,
            })
            .collect();

        let result = ClassificationResult { predictions };
        debug!("top prediction for '{image_id}': {:?}", result.top());
        info!(
            "classified '{image_id}' with '{model_id}' in {:?}",
            started.elapsed()
        );
        Ok(result)
    }
}
