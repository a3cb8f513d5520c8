use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::SemanticError;

/// Modes understood by [`ModelSpec::prepare`](crate::ModelSpec::prepare).
pub const SUPPORTED_MODES: &[&str] = &["fast", "thumbnail", "onnx"];

/// Runtime configuration describing which image model to run and how to post-process vectors.
///
/// # Example
/// ```no_run
/// use semantic::{ModelSpec, SemanticConfig};
///
/// # async fn run() -> Result<(), semantic::SemanticError> {
/// let cfg = SemanticConfig {
///     mode: "thumbnail".into(),
///     thumbnail_size: 16,
///     ..Default::default()
/// };
/// let spec = ModelSpec::prepare(&cfg).await?;
/// let mut model = spec.load()?;
/// let vector = model.embed("cat.jpg".as_ref())?;
/// # let _ = vector;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticConfig {
    /// Model selector: `"fast"` (hash stub), `"thumbnail"` (grayscale thumbnail
    /// vector), or `"onnx"` (local image encoder, needs the `onnx` feature).
    pub mode: String,
    /// Friendly label surfaced in logs and metrics.
    pub model_name: String,
    /// Local path where the ONNX file should live (also used as the download target when
    /// [`model_url`](Self::model_url) is provided).
    pub model_path: PathBuf,
    /// Optional HTTPS URL that will be downloaded when [`model_path`](Self::model_path) is missing.
    pub model_url: Option<String>,
    /// Square input resolution fed to the ONNX encoder.
    pub input_size: u32,
    /// Edge length of the thumbnail; the vector has `thumbnail_size²` entries.
    pub thumbnail_size: u32,
    /// Vector length produced by the `"fast"` stub.
    pub stub_dimension: usize,
    /// Normalize the resulting vector to unit-length (recommended for cosine similarity).
    pub normalize: bool,
    /// Use the stub when ONNX assets are missing instead of refusing to start.
    pub fallback_to_stub: bool,
    /// Compute device (only `"cpu"` is implemented, the field keeps the config forward-compatible).
    pub device: String,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            mode: "thumbnail".into(),
            model_name: "resnet50".into(),
            model_path: PathBuf::from("./models/resnet50/model.onnx"),
            model_url: None,
            input_size: 224,
            thumbnail_size: 32,
            stub_dimension: 512,
            normalize: true,
            fallback_to_stub: false,
            device: "cpu".into(),
        }
    }
}

impl SemanticConfig {
    pub fn validate(&self) -> Result<(), SemanticError> {
        if !SUPPORTED_MODES.contains(&self.mode.as_str()) {
            return Err(SemanticError::InvalidConfig(format!(
                "unknown mode '{}', expected one of {SUPPORTED_MODES:?}",
                self.mode
            )));
        }
        if self.thumbnail_size == 0 || self.thumbnail_size > 512 {
            return Err(SemanticError::InvalidConfig(
                "thumbnail_size must be in 1..=512".into(),
            ));
        }
        if self.input_size == 0 {
            return Err(SemanticError::InvalidConfig(
                "input_size must be greater than zero".into(),
            ));
        }
        if self.stub_dimension == 0 {
            return Err(SemanticError::InvalidConfig(
                "stub_dimension must be greater than zero".into(),
            ));
        }
        if self.device != "cpu" {
            return Err(SemanticError::InvalidConfig(format!(
                "device '{}' is not supported, only 'cpu'",
                self.device
            )));
        }
        Ok(())
    }
}
