//! Label table loading.

use crate::core::{ClassifyError, ClassifyResult};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered class names, index-aligned with the model output vector.
pub type LabelTable = Arc<Vec<String>>;

/// Lazily loaded, read-only label table.
///
/// The table is parsed on the first call to [`LabelCatalog::labels`] and
/// shared by every later caller. A failed load is not remembered, so the next
/// call retries.
#[derive(Debug)]
pub struct LabelCatalog {
    path: PathBuf,
    table: OnceCell<LabelTable>,
}

impl LabelCatalog {
    /// Creates a catalog backed by the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: OnceCell::new(),
        }
    }

    /// Location of the label table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the label table, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::LabelLoad`] if the file is missing, is not JSON,
    /// or is not an array of strings.
    pub fn labels(&self) -> ClassifyResult<LabelTable> {
        self.table
            .get_or_try_init(|| {
                let labels = read_label_file(&self.path)?;
                info!(
                    "loaded {} labels from '{}'",
                    labels.len(),
                    self.path.display()
                );
                Ok(Arc::new(labels))
            })
            .cloned()
    }

    /// Returns the label for one class index.
    pub fn label(&self, index: usize) -> ClassifyResult<String> {
        let table = self.labels()?;
        table.get(index).cloned().ok_or_else(|| {
            ClassifyError::label_load(
                &self.path,
                format!("no label for class {index}, table has {}", table.len()),
            )
        })
    }
}

fn read_label_file(path: &Path) -> ClassifyResult<Vec<String>> {
    debug!("reading label table from '{}'", path.display());
    let content = std::fs::read_to_string(path)
        .map_err(|e| ClassifyError::label_load(path, format!("failed to read file: {e}")))?;
    let labels: Vec<String> = serde_json::from_str(&content).map_err(|e| {
        ClassifyError::label_load(path, format!("expected a JSON array of strings: {e}"))
    })?;
    if labels.is_empty() {
        return Err(ClassifyError::label_load(path, "label table is empty"));
    }
    Ok(labels)
}
