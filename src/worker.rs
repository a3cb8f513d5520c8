//! The single inference worker.
//!
//! A dedicated OS thread owns the model (`&mut` access only), drains the queue one item at a
//! time and records every result into the item's own batch. Model calls can therefore never
//! overlap, whatever the number of batches in flight.

use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use ingest::discard;
use semantic::{EmbeddingModel, SemanticError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::batch::{EmbeddingResult, RecordOutcome};
use crate::coordinator::ModelInfo;
use crate::fanout::WorkItem;
use crate::{MetricsSpan, PipelineError, panic_message};

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
}

pub(crate) struct InferenceWorker {
    handle: JoinHandle<WorkerStats>,
    model: ModelInfo,
}

impl InferenceWorker {
    /// Start the worker thread and build the model on it with `factory`.
    ///
    /// Resolves once the model is loaded, so a broken model surfaces here instead of as a
    /// stream of failed items.
    pub(crate) async fn spawn<F>(
        factory: F,
        rx: mpsc::Receiver<WorkItem>,
    ) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> Result<Box<dyn EmbeddingModel>, SemanticError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = std::thread::Builder::new()
            .name("inference-worker".into())
            .spawn(move || {
                let mut model = match factory() {
                    Ok(model) => model,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return WorkerStats::default();
                    }
                };
                let _ = ready_tx.send(Ok(ModelInfo {
                    name: model.name().to_string(),
                    dimension: model.dimension(),
                }));
                run(model.as_mut(), rx)
            })
            .map_err(|e| PipelineError::WorkerSpawn(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(model)) => {
                info!(model = %model.name, dimension = model.dimension, "inference worker started");
                Ok(Self { handle, model })
            }
            Ok(Err(err)) => Err(PipelineError::Semantic(err)),
            Err(_) => Err(PipelineError::WorkerSpawn(
                "inference worker exited while loading the model".into(),
            )),
        }
    }

    pub(crate) fn model(&self) -> &ModelInfo {
        &self.model
    }

    /// Wait for the thread to finish. Blocks; the queue must be closed first.
    pub(crate) fn join(self) -> Result<WorkerStats, PipelineError> {
        self.handle
            .join()
            .map_err(|_| PipelineError::WorkerSpawn("inference worker panicked".into()))
    }
}

fn run(model: &mut dyn EmbeddingModel, mut rx: mpsc::Receiver<WorkItem>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(item) = rx.blocking_recv() {
        let ok = process_item(model, item);
        stats.processed += 1;
        if !ok {
            stats.failed += 1;
        }
    }
    info!(
        processed = stats.processed,
        failed = stats.failed,
        "inference queue closed, worker stopping"
    );
    stats
}

/// Embed one item and record it into its batch. Returns whether the item succeeded.
///
/// The staged file is removed whatever happens, and a failing or panicking model only fails
/// this item.
pub(crate) fn process_item(model: &mut dyn EmbeddingModel, item: WorkItem) -> bool {
    let WorkItem { outcome, batch } = item;
    let index = outcome.index;

    let result = match (outcome.staged_path, outcome.error) {
        (Some(path), None) => {
            let span = MetricsSpan::start();
            let embedded = panic::catch_unwind(AssertUnwindSafe(|| model.embed(&path)))
                .unwrap_or_else(|payload| {
                    Err(SemanticError::Inference(format!(
                        "model panicked: {}",
                        panic_message(&*payload)
                    )))
                })
                .and_then(|vector| {
                    if vector.is_empty() {
                        Err(SemanticError::Inference("model returned an empty vector".into()))
                    } else {
                        Ok(vector)
                    }
                });

            if let Err(e) = discard(&path) {
                warn!(path = %path.display(), error = %e, "could not remove staged file");
            }
            if let Some(span) = span {
                span.record_inference(embedded.as_ref().map(|_| ()).map_err(|e| e.clone()));
            }

            match embedded {
                Ok(vector) => EmbeddingResult::success(index, outcome.source, vector),
                Err(err) => {
                    warn!(batch_id = %batch.id(), index, error = %err, "inference failed");
                    EmbeddingResult::failed(index, outcome.source, err.to_string())
                }
            }
        }
        (staged, error) => {
            if let Some(path) = staged {
                if let Err(e) = discard(&path) {
                    warn!(path = %path.display(), error = %e, "could not remove staged file");
                }
            }
            let reason = error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "fetch produced no staged file".to_string());
            EmbeddingResult::failed(index, outcome.source, reason)
        }
    };

    let ok = result.ok;
    if batch.record(result) == RecordOutcome::Completed {
        debug!(batch_id = %batch.id(), expected = batch.expected(), "batch complete");
    }
    ok
}
