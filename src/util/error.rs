//! Error types for uilocate.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for uilocate operations.
pub type LocateResult<T> = std::result::Result<T, LocateError>;

/// Errors raised while resolving, matching, indexing or persisting templates.
///
/// Misses inside a single strategy are not errors; they are reported through
/// outcome values and only surface here once every strategy has been tried.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LocateError {
    /// No template is registered or readable for the element.
    #[error("no template for element {element:?}")]
    TemplateNotFound { element: String },
    /// Every image-matching strategy ran without reaching its threshold.
    #[error("template {template:?} not found on screen (best confidence {best_confidence:.3})")]
    MatchNotFound {
        template: PathBuf,
        best_confidence: f32,
    },
    /// Every OCR strategy ran without locating the text.
    #[error("text {text:?} not found on screen")]
    TextNotFound { text: String },
    /// The persisted index document could not be read or parsed.
    #[error("index document {path:?} is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },
    /// A screenshot, crop or template write failed.
    #[error("capture failed: {reason}")]
    CaptureFailed { reason: String },
    /// A configuration value could not be parsed.
    #[error("invalid config value for {key}: {value:?}")]
    ConfigInvalid { key: String, value: String },
    /// The full resolution cascade was exhausted.
    #[error("could not resolve element {element:?} (tried: {})", attempted.join(", "))]
    ResolutionFailed {
        element: String,
        attempted: Vec<String>,
    },
    /// Width or height is zero or overflowed during size computation.
    #[error("invalid dimensions: width={width}, height={height}")]
    InvalidDimensions { width: usize, height: usize },
    /// The input buffer is smaller than the required length.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Stride is smaller than width.
    #[error("invalid stride: width={width}, stride={stride}")]
    InvalidStride { width: usize, stride: usize },
    /// The requested region does not fit inside the image.
    #[error(
        "region out of bounds: x={x}, y={y}, width={width}, height={height}, image={img_width}x{img_height}"
    )]
    RoiOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        img_width: usize,
        img_height: usize,
    },
    /// Image decoding or encoding failed.
    #[error("image io error: {reason}")]
    ImageIo { reason: String },
    /// Filesystem access failed.
    #[error("io error at {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },
    /// A JSON document could not be encoded or decoded.
    #[error("json error: {reason}")]
    Json { reason: String },
    /// The OCR engine failed to run.
    #[error("ocr engine error: {reason}")]
    Ocr { reason: String },
}

impl LocateError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        LocateError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn json(err: serde_json::Error) -> Self {
        LocateError::Json {
            reason: err.to_string(),
        }
    }

    pub(crate) fn image(err: image::ImageError) -> Self {
        LocateError::ImageIo {
            reason: err.to_string(),
        }
    }
}
