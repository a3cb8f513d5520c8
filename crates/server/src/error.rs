use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use imgembed::PipelineError;
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Request timeout")]
    Timeout,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Pipeline(err) => match err {
                PipelineError::InvalidBatch(_) => StatusCode::BAD_REQUEST,
                PipelineError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                PipelineError::BarrierTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::WorkerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::Ingest(_) | PipelineError::Semantic(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PipelineError::WorkerSpawn(_)
                | PipelineError::IncompleteBatch(_)
                | PipelineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Internal(_) | ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Timeout => "REQUEST_TIMEOUT",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Pipeline(err) => match err {
                PipelineError::InvalidBatch(_) => "INVALID_BATCH",
                PipelineError::BatchTooLarge { .. } => "BATCH_TOO_LARGE",
                PipelineError::BarrierTimeout { .. } => "BATCH_TIMEOUT",
                PipelineError::WorkerUnavailable => "WORKER_UNAVAILABLE",
                _ => "PIPELINE_ERROR",
            },
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {err}"))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pipeline_errors_map_to_distinct_statuses() {
        let cases = [
            (
                PipelineError::InvalidBatch("duplicate index 0".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::BatchTooLarge { size: 300, limit: 256 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                PipelineError::BarrierTimeout {
                    batch_id: imgembed::BatchId::new(),
                    timeout: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (PipelineError::WorkerUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (PipelineError::IncompleteBatch(2), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status_code(), status);
        }
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ServerError::NotFound.error_code(), "NOT_FOUND");
        assert_eq!(
            ServerError::from(PipelineError::WorkerUnavailable).error_code(),
            "WORKER_UNAVAILABLE"
        );
    }
}
