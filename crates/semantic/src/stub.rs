use std::path::Path;

use fxhash::hash64;

use crate::normalize::l2_normalize_in_place;
use crate::{EmbeddingModel, SemanticError};

/// Deterministic stub used in `"fast"` mode or when ONNX assets are unavailable.
/// Generates sinusoid values derived from a hash of the file bytes to guarantee reproducible
/// vectors with minimal CPU cost.
#[derive(Debug, Clone)]
pub struct StubModel {
    dimension: usize,
    normalize: bool,
}

impl StubModel {
    pub fn new(dimension: usize, normalize: bool) -> Self {
        Self {
            dimension,
            normalize,
        }
    }

    pub(crate) fn embed_bytes(&self, bytes: &[u8]) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        let h = hash64(bytes);
        for (idx, value) in v.iter_mut().enumerate() {
            *value = ((h >> (idx % 32)) as f32 * 0.0001).sin();
        }
        if self.normalize {
            l2_normalize_in_place(&mut v);
        }
        v
    }
}

impl EmbeddingModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>, SemanticError> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(SemanticError::Decode(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(self.embed_bytes(&bytes))
    }
}
