#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use imgembed::{BatchCoordinator, EmbeddingModel, LocalFetcher, PipelineConfig, SemanticError};
use metrics_exporter_prometheus::PrometheusHandle;
use server::{ServerConfig, ServerState};
use tempfile::TempDir;

/// Embeds a file as the single value `len(bytes)`.
pub struct LenModel;

impl EmbeddingModel for LenModel {
    fn name(&self) -> &str {
        "len"
    }

    fn dimension(&self) -> usize {
        1
    }

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>, SemanticError> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(SemanticError::Decode("empty image".into()));
        }
        Ok(vec![bytes.len() as f32])
    }
}

pub struct TestApp {
    pub state: Arc<ServerState>,
    pub images: TempDir,
    pub staging: TempDir,
}

impl TestApp {
    pub async fn start(max_batch: usize, metrics: Option<PrometheusHandle>) -> Self {
        let images = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        let mut pipeline = PipelineConfig::default();
        pipeline.staging.dir = staging.path().to_path_buf();
        pipeline.batch.max_size = max_batch;
        pipeline.batch.timeout_secs = 10;

        let coordinator = BatchCoordinator::with_components(
            &pipeline,
            Arc::new(LocalFetcher::new()),
            || Ok(Box::new(LenModel) as Box<dyn EmbeddingModel>),
        )
        .await
        .unwrap();

        let state = Arc::new(ServerState::with_coordinator(
            ServerConfig::default(),
            Arc::new(coordinator),
            metrics,
        ));
        Self {
            state,
            images,
            staging,
        }
    }

    pub fn router(&self) -> axum::Router {
        server::build_router(Arc::clone(&self.state))
    }

    /// Write `len` bytes to `name` in the image directory and return its path.
    pub fn image(&self, name: &str, len: usize) -> String {
        let path: PathBuf = self.images.path().join(name);
        std::fs::write(&path, vec![7u8; len]).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub fn missing(&self, name: &str) -> String {
        self.images.path().join(name).to_string_lossy().into_owned()
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
