#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use imgembed::{
    BatchCoordinator, EmbeddingModel, Fetcher, IngestError, PipelineConfig, SemanticError,
};
use tempfile::TempDir;

/// Pipeline config with a private staging directory. Keep the `TempDir` alive for the test.
pub fn config_with_staging() -> (PipelineConfig, TempDir) {
    let staging = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.staging.dir = staging.path().to_path_buf();
    config.fetch.allow_remote = false;
    config.batch.timeout_secs = 20;
    (config, staging)
}

pub fn staged_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

/// Horizontal gradient PNG; `invert` flips it.
pub fn write_png(dir: &Path, name: &str, invert: bool) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(48, 32, |x, y| {
        let v = ((x * 5 + y) % 256) as u8;
        let v = if invert { 255 - v } else { v };
        Rgb([v, v / 2, 255 - v])
    })
    .save(&path)
    .unwrap();
    path
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Writes the source string itself as the staged file's contents.
///
/// Sources may carry directives: `sleep:<ms>:<tag>` delays the fetch, `missing:<tag>` fails
/// it, `panic:<tag>` panics inside the fetcher and `hang:<tag>` never completes.
/// `lag:<ms>:<tag>` writes from the blocking pool after `<ms>`, so the write lands even if
/// the fetch future is dropped first.
#[derive(Default)]
pub struct ScriptedFetcher {
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let result = self.run(source, dest).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl ScriptedFetcher {
    async fn run(&self, source: &str, dest: &Path) -> Result<u64, IngestError> {
        let mut parts = source.splitn(3, ':');
        match parts.next() {
            Some("sleep") => {
                let ms: u64 = parts.next().and_then(|ms| ms.parse().ok()).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Some("missing") => return Err(IngestError::NotFound(source.to_string())),
            Some("panic") => panic!("fetcher blew up on {source}"),
            Some("hang") => std::future::pending::<()>().await,
            Some("lag") => {
                let ms: u64 = parts.next().and_then(|ms| ms.parse().ok()).unwrap_or(0);
                let (dest, body) = (dest.to_path_buf(), source.to_string());
                return tokio::task::spawn_blocking(move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    std::fs::write(&dest, body.as_bytes()).map(|_| body.len() as u64)
                })
                .await
                .map_err(|e| IngestError::Transfer(e.to_string()))?
                .map_err(|e| IngestError::Io(e.to_string()));
            }
            _ => {}
        }
        tokio::fs::write(dest, source.as_bytes())
            .await
            .map_err(|e| IngestError::Io(e.to_string()))?;
        Ok(source.len() as u64)
    }
}

/// Reads back what [`ScriptedFetcher`] staged and embeds it as `[len, first byte]`.
///
/// Panics when two calls overlap, or when the contents contain `boom`.
pub struct ExclusiveModel {
    busy: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl ExclusiveModel {
    pub fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                busy: Arc::new(AtomicBool::new(false)),
                calls: Arc::clone(&calls),
                delay,
            },
            calls,
        )
    }
}

impl EmbeddingModel for ExclusiveModel {
    fn name(&self) -> &str {
        "exclusive"
    }

    fn dimension(&self) -> usize {
        2
    }

    fn embed(&mut self, path: &Path) -> Result<Vec<f32>, SemanticError> {
        assert!(
            !self.busy.swap(true, Ordering::SeqCst),
            "model called concurrently"
        );
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let bytes = std::fs::read(path);
        self.busy.store(false, Ordering::SeqCst);

        let bytes = bytes?;
        if String::from_utf8_lossy(&bytes).contains("boom") {
            panic!("model choked on {}", path.display());
        }
        Ok(vec![bytes.len() as f32, bytes.first().copied().unwrap_or(0) as f32])
    }
}

/// Coordinator over a [`ScriptedFetcher`] and an [`ExclusiveModel`].
pub async fn scripted_coordinator(
    config: &PipelineConfig,
    model_delay: Duration,
) -> (BatchCoordinator, Arc<ScriptedFetcher>, Arc<AtomicUsize>) {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let (model, calls) = ExclusiveModel::new(model_delay);
    let coordinator = BatchCoordinator::with_components(
        config,
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        move || Ok(Box::new(model) as Box<dyn EmbeddingModel>),
    )
    .await
    .unwrap();
    (coordinator, fetcher, calls)
}
