//! Request coordination: validate a batch, fan it out, wait on its barrier, reassemble.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ingest::{Fetcher, StagingArea};
use semantic::{EmbeddingModel, ModelSpec, SemanticError};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::assemble::{EmbeddingResponse, order_results};
use crate::batch::{BatchContext, EmbeddingResult, ItemRef};
use crate::config::PipelineConfig;
use crate::fanout::FanOutPool;
use crate::worker::{InferenceWorker, WorkerStats};
use crate::{MetricsSpan, PipelineError, whole_millis};

/// What the inference worker reported after loading its model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub dimension: usize,
}

/// Entry point of the pipeline. One per process; shared by every request.
pub struct BatchCoordinator {
    pool: FanOutPool,
    worker: Mutex<Option<InferenceWorker>>,
    model: ModelInfo,
    in_flight: Semaphore,
    max_batch_size: usize,
    batch_timeout: Option<Duration>,
    staging: Arc<StagingArea>,
}

impl BatchCoordinator {
    /// Build the production pipeline described by `config`: scheme-routing fetcher, staging
    /// directory, model assets, and the worker thread.
    pub async fn start(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let fetcher = config.fetch.build_fetcher()?;
        let spec = ModelSpec::prepare(&config.semantic).await?;
        info!(
            kind = spec.kind(),
            workers = config.fetch.workers,
            staging = %config.staging.dir.display(),
            "starting batch pipeline"
        );
        Self::with_components(config, Arc::new(fetcher), move || spec.load()).await
    }

    /// Same as [`start`](Self::start) with the fetcher and model supplied by the caller.
    ///
    /// `model_factory` runs on the worker thread.
    pub async fn with_components<F>(
        config: &PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        model_factory: F,
    ) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> Result<Box<dyn EmbeddingModel>, SemanticError> + Send + 'static,
    {
        config.validate()?;
        let staging = Arc::new(StagingArea::new(config.staging.dir.clone())?);

        let (tx, rx) = mpsc::channel(config.inference.queue_capacity);
        let worker = InferenceWorker::spawn(model_factory, rx).await?;
        let model = worker.model().clone();

        let pool = FanOutPool::new(
            fetcher,
            Arc::clone(&staging),
            config.fetch.workers,
            config.fetch.timeout(),
            tx,
        );

        Ok(Self {
            pool,
            worker: Mutex::new(Some(worker)),
            model,
            in_flight: Semaphore::new(config.batch.max_concurrent),
            max_batch_size: config.batch.max_size,
            batch_timeout: config.batch.timeout(),
            staging,
        })
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn fetch_workers(&self) -> usize {
        self.pool.workers()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// `false` once [`shutdown`](Self::shutdown) has started.
    pub fn is_running(&self) -> bool {
        !self.pool.is_closed()
    }

    /// Embed `sources` and return one response per source, in order.
    pub async fn handle_batch(
        &self,
        sources: Vec<String>,
    ) -> Result<Vec<EmbeddingResponse>, PipelineError> {
        let results = self.handle_items(ItemRef::enumerate(sources)).await?;
        Ok(results.into_iter().map(EmbeddingResponse::from).collect())
    }

    /// Run one batch through the pipeline.
    ///
    /// Indices must be unique and cover `0..items.len()`. The returned results are sorted by
    /// index; failed items carry `ok = false` and the sentinel vector. Empty input returns
    /// immediately.
    pub async fn handle_items(
        &self,
        items: Vec<ItemRef>,
    ) -> Result<Vec<EmbeddingResult>, PipelineError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        validate_items(&items, self.max_batch_size)?;
        if !self.is_running() {
            return Err(PipelineError::WorkerUnavailable);
        }

        let _slot = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| PipelineError::WorkerUnavailable)?;

        let size = items.len();
        let span = MetricsSpan::start();
        let started = Instant::now();
        let (batch, barrier) = BatchContext::new(size);
        info!(batch_id = %batch.id(), size, "batch accepted");

        self.pool.dispatch(&batch, items);

        if let Err(err) = barrier.wait(self.batch_timeout).await {
            warn!(batch_id = %batch.id(), received = batch.received(), expected = size, error = %err, "batch aborted");
            if let Some(span) = span {
                span.record_batch(size, Err(&err));
            }
            return Err(err);
        }

        let ordered = order_results(batch.take_results(), size);
        let failed = ordered
            .as_ref()
            .map(|results| results.iter().filter(|r| !r.ok).count());
        if let Some(span) = span {
            span.record_batch(size, failed);
        }
        let elapsed_ms = whole_millis(started.elapsed());
        match failed {
            Ok(failed) => {
                info!(batch_id = %batch.id(), size, failed, elapsed_ms, "batch complete");
            }
            Err(err) => {
                warn!(batch_id = %batch.id(), error = %err, "batch reassembly failed");
            }
        }
        ordered
    }

    /// Stop accepting batches, let in-flight items drain, and join the worker thread.
    ///
    /// Safe to call more than once; later calls return empty stats.
    pub async fn shutdown(&self) -> Result<WorkerStats, PipelineError> {
        self.pool.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(worker) = worker else {
            debug!("batch pipeline already shut down");
            return Ok(WorkerStats::default());
        };

        let stats = tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| PipelineError::WorkerSpawn(e.to_string()))??;
        info!(
            processed = stats.processed,
            failed = stats.failed,
            "batch pipeline stopped"
        );
        Ok(stats)
    }
}

/// Size limit first, then index shape: unique and exactly `0..len`.
fn validate_items(items: &[ItemRef], max_size: usize) -> Result<(), PipelineError> {
    if items.len() > max_size {
        return Err(PipelineError::BatchTooLarge {
            size: items.len(),
            limit: max_size,
        });
    }
    let mut seen = vec![false; items.len()];
    for item in items {
        match seen.get_mut(item.index) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(PipelineError::InvalidBatch(format!(
                    "duplicate index {}",
                    item.index
                )));
            }
            None => {
                return Err(PipelineError::InvalidBatch(format!(
                    "index {} out of range for a batch of {}",
                    item.index,
                    items.len()
                )));
            }
        }
    }
    Ok(())
}
