//! Constants used throughout the classification pipeline.
//!
//! The preprocessing values reproduce the torchvision ImageNet evaluation
//! transform exactly. The pretrained weights were fit against this
//! distribution, so changing any of them silently degrades accuracy.

/// Length the shorter image side is resized to before cropping.
pub const RESIZE_SHORT_SIDE: u32 = 256;

/// Side length of the square center crop fed to the model.
pub const CROP_SIZE: u32 = 224;

/// Scale applied to 8-bit intensities to map them into [0, 1].
pub const PIXEL_SCALE: f32 = 1.0 / 255.0;

/// Per-channel mean of the ImageNet training set (RGB order).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set (RGB order).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Number of ranked predictions returned per classification.
pub const TOP_K: usize = 5;

/// File name of the label table inside the image library directory.
pub const DEFAULT_LABELS_FILE: &str = "imagenet_labels.json";

/// Delay between scheduling an upload cleanup and deleting the directory.
pub const DEFAULT_CLEANUP_GRACE_SECS: u64 = 30;

/// Number of deletion attempts before a cleanup task gives up.
pub const DEFAULT_CLEANUP_MAX_ATTEMPTS: u32 = 3;

/// Pause between failed deletion attempts.
pub const DEFAULT_CLEANUP_RETRY_DELAY_MS: u64 = 500;

/// Period of the orphaned-session janitor sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// File extensions listed as library images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];
