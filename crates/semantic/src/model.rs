use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::assets::{ensure_local_file, should_fallback_to_stub};
use crate::{SemanticConfig, SemanticError, StubModel, ThumbnailModel};

/// An image encoder: staged file in, vector out.
///
/// Implementations are free to keep mutable scratch state and are not expected to be
/// shareable; the pipeline owns exactly one instance on one thread.
pub trait EmbeddingModel {
    fn name(&self) -> &str;

    /// Length of the vectors produced by [`embed`](Self::embed), `0` when unknown up front.
    fn dimension(&self) -> usize;

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>, SemanticError>;
}

/// A fully resolved recipe for building a model.
///
/// [`prepare`](Self::prepare) does the async part (asset downloads) on the runtime;
/// [`load`](Self::load) builds the model synchronously on whichever thread will own it.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSpec {
    Stub {
        dimension: usize,
        normalize: bool,
    },
    Thumbnail {
        size: u32,
        normalize: bool,
    },
    Onnx {
        name: String,
        model_path: PathBuf,
        input_size: u32,
        normalize: bool,
    },
}

impl ModelSpec {
    /// Validate `cfg` and resolve any model assets it points at.
    ///
    /// With `fallback_to_stub` set, a missing or undownloadable ONNX model degrades to the
    /// `"fast"` stub instead of failing.
    pub async fn prepare(cfg: &SemanticConfig) -> Result<Self, SemanticError> {
        cfg.validate()?;

        let stub = ModelSpec::Stub {
            dimension: cfg.stub_dimension,
            normalize: cfg.normalize,
        };

        match cfg.mode.as_str() {
            "fast" => Ok(stub),
            "thumbnail" => Ok(ModelSpec::Thumbnail {
                size: cfg.thumbnail_size,
                normalize: cfg.normalize,
            }),
            "onnx" => {
                if !cfg!(feature = "onnx") {
                    if cfg.fallback_to_stub {
                        warn!("built without the `onnx` feature, using stub model");
                        return Ok(stub);
                    }
                    return Err(SemanticError::InvalidConfig(
                        "mode 'onnx' requires the `onnx` cargo feature".into(),
                    ));
                }

                match ensure_local_file(&cfg.model_path, cfg.model_url.as_deref()).await {
                    Ok(model_path) => Ok(ModelSpec::Onnx {
                        name: cfg.model_name.clone(),
                        model_path,
                        input_size: cfg.input_size,
                        normalize: cfg.normalize,
                    }),
                    Err(err) if cfg.fallback_to_stub && should_fallback_to_stub(&err) => {
                        warn!(error = %err, "model assets unavailable, using stub model");
                        Ok(stub)
                    }
                    Err(err) => Err(err),
                }
            }
            other => Err(SemanticError::InvalidConfig(format!("unknown mode '{other}'"))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelSpec::Stub { .. } => "fast",
            ModelSpec::Thumbnail { .. } => "thumbnail",
            ModelSpec::Onnx { .. } => "onnx",
        }
    }

    /// Build the model. Call this on the thread that will own it.
    pub fn load(&self) -> Result<Box<dyn EmbeddingModel>, SemanticError> {
        let model: Box<dyn EmbeddingModel> = match self {
            ModelSpec::Stub {
                dimension,
                normalize,
            } => Box::new(StubModel::new(*dimension, *normalize)),
            ModelSpec::Thumbnail { size, normalize } => {
                Box::new(ThumbnailModel::new(*size, *normalize))
            }
            ModelSpec::Onnx {
                name,
                model_path,
                input_size,
                normalize,
            } => load_onnx(name, model_path, *input_size, *normalize)?,
        };
        info!(
            kind = self.kind(),
            model = model.name(),
            dimension = model.dimension(),
            "embedding model loaded"
        );
        Ok(model)
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(
    name: &str,
    model_path: &Path,
    input_size: u32,
    normalize: bool,
) -> Result<Box<dyn EmbeddingModel>, SemanticError> {
    Ok(Box::new(crate::onnx::OnnxImageModel::load(
        name, model_path, input_size, normalize,
    )?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(
    _name: &str,
    model_path: &Path,
    _input_size: u32,
    _normalize: bool,
) -> Result<Box<dyn EmbeddingModel>, SemanticError> {
    Err(SemanticError::InvalidConfig(format!(
        "cannot load {}: built without the `onnx` cargo feature",
        model_path.display()
    )))
}
