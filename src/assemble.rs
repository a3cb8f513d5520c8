//! Response assembly: restore input order and shape the wire payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EmbeddingResult, PipelineError};

/// One entry of the batch response, index-aligned with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub vec: Vec<f32>,
    pub shape: Vec<usize>,
    /// The source reference exactly as submitted.
    pub path: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<EmbeddingResult> for EmbeddingResponse {
    fn from(result: EmbeddingResult) -> Self {
        Self {
            shape: vec![result.vector.len()],
            vec: result.vector,
            path: result.source,
            ok: result.ok,
            error: result.error,
        }
    }
}

/// Results for indices `0..expected`, in order.
///
/// Fails with [`PipelineError::IncompleteBatch`] on the first missing index. Entries at or
/// beyond `expected` are dropped.
pub fn order_results(
    mut buffer: BTreeMap<usize, EmbeddingResult>,
    expected: usize,
) -> Result<Vec<EmbeddingResult>, PipelineError> {
    (0..expected)
        .map(|index| {
            buffer
                .remove(&index)
                .ok_or(PipelineError::IncompleteBatch(index))
        })
        .collect()
}

/// Ordered wire payload for a drained batch buffer.
pub fn assemble(
    buffer: BTreeMap<usize, EmbeddingResult>,
    expected: usize,
) -> Result<Vec<EmbeddingResponse>, PipelineError> {
    Ok(order_results(buffer, expected)?
        .into_iter()
        .map(EmbeddingResponse::from)
        .collect())
}
