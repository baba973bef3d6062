//! Image source resolution.
//!
//! Images are addressed by a plain file name inside either the shared image
//! library or an upload session directory. [`ImageLibrary::resolve`] checks
//! the name, locates the file and decodes it into an [`ImageHandle`].

use crate::core::constants::IMAGE_EXTENSIONS;
use crate::core::{ClassifyError, ClassifyResult};
use image::{DynamicImage, ImageReader};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Checks that `image_id` is a single plain file name.
///
/// Rejects empty names, separators, `.` and `..`, absolute paths, drive
/// prefixes and NUL bytes, so a joined path can never leave its directory.
pub fn validate_image_id(image_id: &str) -> ClassifyResult<&str> {
    if image_id.is_empty() {
        return Err(ClassifyError::invalid_image_id(image_id, "must not be empty"));
    }
    if image_id.contains('\0') {
        return Err(ClassifyError::invalid_image_id(
            image_id,
            "must not contain NUL bytes",
        ));
    }
    if image_id.contains('/') || image_id.contains('\\') {
        return Err(ClassifyError::invalid_image_id(
            image_id,
            "must not contain path separators",
        ));
    }

    let mut components = Path::new(image_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(image_id),
        _ => Err(ClassifyError::invalid_image_id(
            image_id,
            "must be a plain file name",
        )),
    }
}

/// A decoded image, owned by whoever resolved it.
///
/// The decoded pixels are freed when the handle is closed or dropped, so the
/// pipeline releases it on every exit path simply by letting it go out of
/// scope; [`ImageHandle::close`] makes the release explicit on success.
#[derive(Debug)]
pub struct ImageHandle {
    image: DynamicImage,
    path: PathBuf,
}

impl ImageHandle {
    /// The decoded image.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Where the image was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the image.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        trace!("released image '{}'", self.path.display());
    }
}

/// Locates images in the shared library or an override directory.
#[derive(Debug, Clone)]
pub struct ImageLibrary {
    image_dir: PathBuf,
    labels_path: PathBuf,
}

impl ImageLibrary {
    /// Creates a resolver rooted at the shared library directory.
    ///
    /// `labels_path` is excluded from [`ImageLibrary::list_images`].
    pub fn new(image_dir: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            labels_path: labels_path.into(),
        }
    }

    /// The shared library directory.
    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Opens and decodes `image_id` from `directory_override`, or from the
    /// library directory when no override is given.
    ///
    /// # Errors
    ///
    /// * [`ClassifyError::InvalidImageId`] if `image_id` is not a plain file name.
    /// * [`ClassifyError::ImageNotFound`] if no such file exists.
    /// * [`ClassifyError::Storage`] if the file cannot be read.
    /// * [`ClassifyError::ImageDecode`] if the file cannot be decoded.
    pub fn resolve(
        &self,
        image_id: &str,
        directory_override: Option<&Path>,
    ) -> ClassifyResult<ImageHandle> {
        let image_id = validate_image_id(image_id)?;
        let dir = directory_override.unwrap_or(&self.image_dir);
        let path = dir.join(image_id);

        if !path.is_file() {
            return Err(ClassifyError::ImageNotFound { path });
        }

        debug!("decoding image '{}'", path.display());
        let image = decode_image(&path)?;

        Ok(ImageHandle { image, path })
    }

    /// Sorted file names of the images in the library directory.
    ///
    /// Files are selected by extension; the label table is never listed.
    pub fn list_images(&self) -> ClassifyResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.image_dir)
            .map_err(|e| ClassifyError::storage("list", &self.image_dir, e))?;

        let mut images = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ClassifyError::storage("list", &self.image_dir, e))?;
            let path = entry.path();
            if !path.is_file() || path == self.labels_path {
                continue;
            }
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if let (true, Some(name)) = (is_image, path.file_name().and_then(|n| n.to_str())) {
                images.push(name.to_string());
            }
        }
        images.sort();
        Ok(images)
    }
}

/// Reads `path` and decodes it, sniffing the format from the content.
///
/// Failing to open or read the file is a storage error; only bytes that are
/// not a supported image are a decode error.
fn decode_image(path: &Path) -> ClassifyResult<DynamicImage> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| ClassifyError::storage("read", path, e))?;
    reader.decode().map_err(|source| ClassifyError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })
}
