use std::io;
use thiserror::Error;

/// Errors surfaced while preparing or running an embedding model.
#[derive(Debug, Error)]
pub enum SemanticError {
    /// The ONNX model could not be located locally and no fallback URL was provided.
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    /// Configuration is inconsistent (unknown mode, zero-sized thumbnails, ...).
    #[error("invalid semantic config: {0}")]
    InvalidConfig(String),
    /// Unable to download remote assets.
    #[error("download failed: {0}")]
    Download(String),
    /// Low-level IO failures while touching the filesystem.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The staged file is not an image we can decode.
    #[error("image decode failed: {0}")]
    Decode(String),
    /// ONNX Runtime or post-processing errors.
    #[error("inference failure: {0}")]
    Inference(String),
}

impl Clone for SemanticError {
    fn clone(&self) -> Self {
        match self {
            SemanticError::ModelNotFound(s) => SemanticError::ModelNotFound(s.clone()),
            SemanticError::InvalidConfig(s) => SemanticError::InvalidConfig(s.clone()),
            SemanticError::Download(s) => SemanticError::Download(s.clone()),
            SemanticError::Io(e) => SemanticError::Io(io::Error::new(e.kind(), e.to_string())),
            SemanticError::Decode(s) => SemanticError::Decode(s.clone()),
            SemanticError::Inference(s) => SemanticError::Inference(s.clone()),
        }
    }
}

impl From<image::ImageError> for SemanticError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => SemanticError::Io(io),
            other => SemanticError::Decode(other.to_string()),
        }
    }
}
