//! Error type shared by every stage of the landcover workflow.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that abort processing of the current image.
///
/// None of these are transient, so callers never retry; a batch driver logs
/// the error and moves on to the next image.
#[derive(Error, Debug)]
pub enum Error {
    /// Library or image file absent.
    #[error("missing resource: {}", path.display())]
    MissingResource { path: PathBuf },

    /// Spectral library rows are inconsistent or unparseable.
    #[error("malformed spectral library (line {line}): {reason}")]
    MalformedLibrary { line: usize, reason: String },

    /// Dark-target sample export cannot be read as eight band rows.
    #[error("malformed dark-target samples (line {line}): {reason}")]
    MalformedSamples { line: usize, reason: String },

    /// Lookup by sample ID or category found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Pixel, endmember or threshold dimensions disagree.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A layer cannot be reshaped to the target (height, width).
    #[error("shape mismatch for '{layer}': {len} values cannot form {height}x{width}")]
    ShapeMismatch {
        layer: String,
        len: usize,
        height: usize,
        width: usize,
    },

    /// Output raster cannot be created or written.
    #[error("cannot write {}: {source}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Input raster could not be decoded.
    #[error("raster decode error in {}: {source}", path.display())]
    Raster {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    /// Unsupported raster layout or sample type.
    #[error("unsupported raster {}: {reason}", path.display())]
    UnsupportedRaster { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn write<E>(path: impl Into<PathBuf>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WriteError {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn raster(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        Self::Raster {
            path: path.into(),
            source,
        }
    }
}
