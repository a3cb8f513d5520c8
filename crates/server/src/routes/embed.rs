use crate::error::ServerResult;
use crate::state::ServerState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use imgembed::EmbeddingResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Batch request body: image references in the order results should come back.
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub path: Vec<String>,
}

/// `POST /predict`
///
/// Returns a bare array, one entry per requested path. Failed items carry
/// `ok: false`, an `error` and the vector `[-1.0]`; they never fail the request.
pub async fn predict(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ServerResult<Json<Vec<EmbeddingResponse>>> {
    let Json(request) = payload?;
    let results = state.coordinator.handle_batch(request.path).await?;
    Ok(Json(results))
}

/// Response for `POST /api/v1/embed`
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<EmbeddingResponse>,
}

impl From<Vec<EmbeddingResponse>> for EmbedResponse {
    fn from(results: Vec<EmbeddingResponse>) -> Self {
        let successful = results.iter().filter(|r| r.ok).count();
        Self {
            processed: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// `POST /api/v1/embed`: same batch semantics as `/predict` with counts attached.
pub async fn embed_batch(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ServerResult<Json<EmbedResponse>> {
    let Json(request) = payload?;
    let results = state.coordinator.handle_batch(request.path).await?;
    Ok(Json(EmbedResponse::from(results)))
}
