//! ONNX Runtime inference engine with a round-robin session pool.

use super::{ClassificationModel, Tensor2D, Tensor4D};
use crate::core::config::{InferenceConfig, OrtGraphOptimizationLevel, OrtSessionConfig};
use crate::core::errors::ClassifyError;
use ndarray::ArrayView2;
use ort::logging::LogLevel;
use ort::session::{Session, builder::SessionBuilder};
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct OrtInfer {
    sessions: Vec<Mutex<Session>>,
    next_idx: AtomicUsize,
    input_name: String,
    output_name: String,
    model_path: PathBuf,
    model_name: String,
}

impl std::fmt::Debug for OrtInfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtInfer")
            .field("sessions", &self.sessions.len())
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("model_path", &self.model_path)
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl OrtInfer {
    /// Creates a session pool for the model at `model_path`.
    ///
    /// Input and output tensor names are discovered from the first session,
    /// so any single-input single-output classifier export works.
    pub fn from_config(
        model_name: &str,
        model_path: impl AsRef<Path>,
        config: &InferenceConfig,
    ) -> Result<Self, ClassifyError> {
        let path = model_path.as_ref();
        let pool_size = config.session_pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let session = Self::build_session(&config.ort_session, path).map_err(|e| {
                ClassifyError::model_load(
                    model_name,
                    path,
                    "failed to create ONNX session",
                    Some(e),
                )
            })?;
            sessions.push(session);
        }

        let (input_name, output_name) = {
            let first = &sessions[0];
            let input = first.inputs.first().ok_or_else(|| {
                ClassifyError::model_load(
                    model_name,
                    path,
                    "model declares no inputs",
                    None::<ort::Error>,
                )
            })?;
            let output = first.outputs.first().ok_or_else(|| {
                ClassifyError::model_load(
                    model_name,
                    path,
                    "model declares no outputs",
                    None::<ort::Error>,
                )
            })?;
            (input.name.clone(), output.name.clone())
        };

        Ok(OrtInfer {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            next_idx: AtomicUsize::new(0),
            input_name,
            output_name,
            model_path: path.to_path_buf(),
            model_name: model_name.to_string(),
        })
    }

    fn build_session(cfg: &OrtSessionConfig, path: &Path) -> Result<Session, ort::Error> {
        let builder = Session::builder()?.with_log_level(LogLevel::Error)?;
        Self::apply_ort_config(builder, cfg)?.commit_from_file(path)
    }

    fn apply_ort_config(
        mut builder: SessionBuilder,
        cfg: &OrtSessionConfig,
    ) -> Result<SessionBuilder, ort::Error> {
        if let Some(intra) = cfg.intra_threads {
            builder = builder.with_intra_threads(intra)?;
        }
        if let Some(inter) = cfg.inter_threads {
            builder = builder.with_inter_threads(inter)?;
        }
        if let Some(par) = cfg.parallel_execution {
            builder = builder.with_parallel_execution(par)?;
        }
        builder = builder.with_optimization_level(graph_optimization_level(
            cfg.get_optimization_level(),
        ))?;
        Ok(builder)
    }

    /// Returns the model path associated with this inference engine.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Number of sessions in the pool.
    pub fn pool_size(&self) -> usize {
        self.sessions.len()
    }

    pub fn infer_2d(&self, x: &Tensor4D) -> Result<Tensor2D, ClassifyError> {
        let batch_size = x.shape()[0];
        let input_shape = x.shape().to_vec();

        let input_tensor = TensorRef::from_array_view(x.view()).map_err(|e| {
            ClassifyError::inference(
                &self.model_name,
                format!("failed to convert input tensor with shape {input_shape:?}"),
                e,
            )
        })?;
        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];

        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session_guard = self.sessions[idx].lock().map_err(|_| {
            ClassifyError::inference_message(
                &self.model_name,
                format!(
                    "session {}/{} was poisoned by a previous panic",
                    idx,
                    self.sessions.len()
                ),
            )
        })?;

        let outputs = session_guard.run(inputs).map_err(|e| {
            ClassifyError::inference(
                &self.model_name,
                format!(
                    "ONNX Runtime inference failed with input '{}' -> output '{}'",
                    self.input_name, self.output_name
                ),
                e,
            )
        })?;

        let (output_shape, output_data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                ClassifyError::inference(
                    &self.model_name,
                    format!("failed to extract output tensor '{}' as f32", self.output_name),
                    e,
                )
            })?;

        if output_shape.len() != 2 || output_shape[0] as usize != batch_size {
            return Err(ClassifyError::inference_message(
                &self.model_name,
                format!(
                    "expected output shape [{batch_size}, classes], got {:?}",
                    &output_shape[..]
                ),
            ));
        }
        let num_classes = output_shape[1] as usize;

        ArrayView2::from_shape((batch_size, num_classes), output_data)
            .map(|view| view.to_owned())
            .map_err(|e| {
                ClassifyError::inference(
                    &self.model_name,
                    format!("output data does not match shape {:?}", &output_shape[..]),
                    e,
                )
            })
    }
}

impl ClassificationModel for OrtInfer {
    fn forward(&self, batch: &Tensor4D) -> Result<Tensor2D, ClassifyError> {
        self.infer_2d(batch)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

fn graph_optimization_level(
    level: OrtGraphOptimizationLevel,
) -> ort::session::builder::GraphOptimizationLevel {
    use ort::session::builder::GraphOptimizationLevel as GOL;
    match level {
        OrtGraphOptimizationLevel::DisableAll => GOL::Disable,
        OrtGraphOptimizationLevel::Level1 => GOL::Level1,
        OrtGraphOptimizationLevel::Level2 => GOL::Level2,
        OrtGraphOptimizationLevel::Level3 => GOL::Level3,
    }
}
