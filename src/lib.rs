//! Batch image-embedding pipeline.
//!
//! A caller hands over an ordered list of image references and gets back one
//! vector per reference, in the same order. Three stages do the work:
//!
//! 1. a fixed-size fan-out pool fetches every source concurrently into a
//!    private staging directory,
//! 2. a single inference worker thread owns the model and embeds staged files
//!    one at a time, deleting each file once it is done with it,
//! 3. a per-batch completion barrier wakes the caller once every item has a
//!    result, and the results are reassembled by index.
//!
//! Failed items never fail the batch. They come back with `ok = false`, an
//! error string and the sentinel vector `[-1.0]`.
//!
//! ```no_run
//! use imgembed::{BatchCoordinator, PipelineConfig};
//!
//! # async fn run() -> Result<(), imgembed::PipelineError> {
//! let coordinator = BatchCoordinator::start(&PipelineConfig::default()).await?;
//! let results = coordinator
//!     .handle_batch(vec!["images/cat.jpg".into(), "images/dog.jpg".into()])
//!     .await?;
//! assert_eq!(results.len(), 2);
//! coordinator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod batch;
pub mod config;
pub mod coordinator;
mod fanout;
mod worker;

pub use crate::assemble::{EmbeddingResponse, assemble, order_results};
pub use crate::batch::{
    BatchContext, BatchId, CompletionBarrier, EmbeddingResult, FetchOutcome, ItemRef,
    RecordOutcome, SENTINEL_VALUE,
};
pub use crate::config::{
    BatchYamlConfig, ConfigLoadError, FetchYamlConfig, InferenceYamlConfig, PipelineConfig,
    StagingYamlConfig,
};
pub use crate::coordinator::{BatchCoordinator, ModelInfo};
pub use crate::worker::WorkerStats;

pub use ingest::{
    Fetcher, HttpFetchConfig, HttpFetcher, IngestError, LocalFetcher, RetryConfig,
    RoutingFetcher, S3FetchConfig, S3Fetcher, StagingArea,
};
pub use semantic::{EmbeddingModel, ModelSpec, SemanticConfig, SemanticError};

use std::any::Any;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Request-level failures. Per-item fetch and inference failures never show up here;
/// they are carried on the individual [`EmbeddingResult`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("batch of {size} items exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("batch {batch_id} did not complete within {}s", .timeout.as_secs_f64())]
    BarrierTimeout { batch_id: BatchId, timeout: Duration },

    #[error("inference worker is not running")]
    WorkerUnavailable,

    #[error("failed to start inference worker: {0}")]
    WorkerSpawn(String),

    #[error("batch incomplete: no result for index {0}")]
    IncompleteBatch(usize),

    #[error("ingest failure: {0}")]
    Ingest(#[from] IngestError),

    #[error("model failure: {0}")]
    Semantic(#[from] SemanticError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigLoadError),
}

impl PipelineError {
    /// Short machine-readable label, used for metrics and error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidBatch(_) => "invalid_batch",
            PipelineError::BatchTooLarge { .. } => "batch_too_large",
            PipelineError::BarrierTimeout { .. } => "barrier_timeout",
            PipelineError::WorkerUnavailable => "worker_unavailable",
            PipelineError::WorkerSpawn(_) => "worker_spawn",
            PipelineError::IncompleteBatch(_) => "incomplete_batch",
            PipelineError::Ingest(_) => "ingest",
            PipelineError::Semantic(_) => "semantic",
            PipelineError::Config(_) => "config",
        }
    }
}

/// Metrics observer for pipeline stages.
pub trait PipelineMetrics: Send + Sync {
    fn record_fetch(&self, latency: Duration, result: Result<(), IngestError>);
    fn record_inference(&self, latency: Duration, result: Result<(), SemanticError>);
    /// `failed` counts items that came back with the sentinel vector.
    fn record_batch(&self, latency: Duration, size: usize, result: Result<usize, &PipelineError>);
}

/// Install or clear the global pipeline metrics recorder.
pub fn set_pipeline_metrics(recorder: Option<Arc<dyn PipelineMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PipelineMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn PipelineMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn PipelineMetrics>> {
    let guard = metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

pub(crate) struct MetricsSpan {
    recorder: Arc<dyn PipelineMetrics>,
    start: Instant,
}

impl MetricsSpan {
    pub(crate) fn start() -> Option<Self> {
        metrics_recorder().map(|recorder| Self {
            recorder,
            start: Instant::now(),
        })
    }

    pub(crate) fn record_fetch(self, result: Result<(), IngestError>) {
        self.recorder.record_fetch(self.start.elapsed(), result);
    }

    pub(crate) fn record_inference(self, result: Result<(), SemanticError>) {
        self.recorder.record_inference(self.start.elapsed(), result);
    }

    pub(crate) fn record_batch(self, size: usize, result: Result<usize, &PipelineError>) {
        self.recorder
            .record_batch(self.start.elapsed(), size, result);
    }
}

/// Whole milliseconds in `duration`, saturating instead of truncating.
pub(crate) fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(
            PipelineError::BatchTooLarge { size: 3, limit: 2 }.kind(),
            "batch_too_large"
        );
        assert_eq!(PipelineError::WorkerUnavailable.kind(), "worker_unavailable");
        let err: PipelineError = IngestError::NotFound("cat.jpg".into()).into();
        assert_eq!(err.kind(), "ingest");
        assert!(err.to_string().contains("cat.jpg"));
    }

    #[test]
    fn barrier_timeout_message_names_batch() {
        let id = BatchId::new();
        let err = PipelineError::BarrierTimeout {
            batch_id: id,
            timeout: Duration::from_millis(1500),
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("1.5s"));
    }

    #[test]
    fn whole_millis_saturates() {
        assert_eq!(whole_millis(Duration::from_micros(2_500)), 2);
        assert_eq!(whole_millis(Duration::from_secs(90)), 90_000);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*caught), "boom");

        let caught = std::panic::catch_unwind(|| panic!("{} items", 3)).unwrap_err();
        assert_eq!(panic_message(&*caught), "3 items");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*caught), "unknown panic");
    }
}
