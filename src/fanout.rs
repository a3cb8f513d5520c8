//! Fan-out fetch pool.
//!
//! Every dispatched item gets its own task, but at most `workers` fetches run at once. Each
//! task produces exactly one [`FetchOutcome`] and forwards it to the inference queue; if the
//! queue is gone the failure is recorded straight into the batch.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::FutureExt;
use ingest::{discard_async, Fetcher, IngestError, StagingArea};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::batch::{BatchContext, EmbeddingResult, FetchOutcome, ItemRef};
use crate::{MetricsSpan, panic_message};

/// One unit of work for the inference worker.
pub(crate) struct WorkItem {
    pub(crate) outcome: FetchOutcome,
    pub(crate) batch: Arc<BatchContext>,
}

pub(crate) struct FanOutPool {
    fetcher: Arc<dyn Fetcher>,
    staging: Arc<StagingArea>,
    permits: Arc<Semaphore>,
    workers: usize,
    fetch_timeout: Duration,
    queue: RwLock<Option<mpsc::Sender<WorkItem>>>,
}

impl FanOutPool {
    pub(crate) fn new(
        fetcher: Arc<dyn Fetcher>,
        staging: Arc<StagingArea>,
        workers: usize,
        fetch_timeout: Duration,
        queue: mpsc::Sender<WorkItem>,
    ) -> Self {
        Self {
            fetcher,
            staging,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            fetch_timeout,
            queue: RwLock::new(Some(queue)),
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Drop the pool's handle on the inference queue. Fetches already in flight keep their own
    /// handles and still deliver; the worker exits once they are done.
    pub(crate) fn close(&self) {
        let mut guard = self
            .queue
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }

    /// Fire-and-forget: spawn one fetch task per item. Must be called inside a tokio runtime.
    pub(crate) fn dispatch(&self, batch: &Arc<BatchContext>, items: Vec<ItemRef>) {
        let queue = self.sender();
        for item in items {
            let task = FetchTask {
                fetcher: Arc::clone(&self.fetcher),
                staging: Arc::clone(&self.staging),
                permits: Arc::clone(&self.permits),
                fetch_timeout: self.fetch_timeout,
                queue: queue.clone(),
                batch: Arc::clone(batch),
            };
            tokio::spawn(task.run(item));
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<WorkItem>> {
        self.queue
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

struct FetchTask {
    fetcher: Arc<dyn Fetcher>,
    staging: Arc<StagingArea>,
    permits: Arc<Semaphore>,
    fetch_timeout: Duration,
    queue: Option<mpsc::Sender<WorkItem>>,
    batch: Arc<BatchContext>,
}

impl FetchTask {
    async fn run(self, item: ItemRef) {
        // the permit is held until the outcome is queued, which bounds staged files on disk
        let _permit = Arc::clone(&self.permits).acquire_owned().await.ok();

        let outcome = self.fetch(item).await;
        self.forward(outcome).await;
    }

    async fn fetch(&self, item: ItemRef) -> FetchOutcome {
        let ItemRef { index, source } = item;
        let dest = self.staging.allocate(&source);
        let span = MetricsSpan::start();

        let attempt = {
            let fetcher = Arc::clone(&self.fetcher);
            let (source, dest) = (source.clone(), dest.clone());
            AssertUnwindSafe(async move { fetcher.fetch(&source, &dest).await }).catch_unwind()
        };
        let mut attempt = Box::pin(attempt);

        let settled = tokio::time::timeout(self.fetch_timeout, &mut attempt).await;
        let result = match settled {
            Ok(Ok(Ok(bytes))) => Ok(bytes),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(panic)) => Err(IngestError::Transfer(format!(
                "fetcher panicked: {}",
                panic_message(&*panic)
            ))),
            Err(_elapsed) => {
                drain_abandoned(attempt, dest.clone(), self.fetch_timeout);
                Err(IngestError::Timeout(self.fetch_timeout))
            }
        };

        if let Some(span) = span {
            span.record_fetch(result.as_ref().map(|_| ()).map_err(|e| e.clone()));
        }

        match result {
            Ok(bytes) => {
                debug!(batch_id = %self.batch.id(), index, source = %source, bytes, "fetched");
                FetchOutcome::staged(index, source, dest)
            }
            Err(err) => {
                // a failed fetch may still have left a partial file behind
                if let Err(e) = discard_async(&dest).await {
                    warn!(path = %dest.display(), error = %e, "could not remove partial fetch");
                }
                warn!(batch_id = %self.batch.id(), index, source = %source, error = %err, "fetch failed");
                FetchOutcome::failed(index, source, err)
            }
        }
    }

    async fn forward(self, outcome: FetchOutcome) {
        let item = WorkItem {
            outcome,
            batch: self.batch,
        };
        let Some(queue) = self.queue else {
            record_undeliverable(item).await;
            return;
        };
        if let Err(mpsc::error::SendError(item)) = queue.send(item).await {
            record_undeliverable(item).await;
        }
    }
}

/// Let a timed-out fetch settle in the background, then remove whatever it staged.
///
/// Dropping the fetch outright is not enough: file operations already handed to the blocking
/// pool finish anyway and can recreate `dest` after the failure path has cleaned it up. The
/// fetch gets up to `grace` more to finish before it is dropped.
fn drain_abandoned<F>(attempt: Pin<Box<F>>, dest: PathBuf, grace: Duration)
where
    F: Future + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::time::timeout(grace, attempt).await.is_err() {
            debug!(path = %dest.display(), "abandoned fetch still running, dropping it");
        }
        if let Err(e) = discard_async(&dest).await {
            warn!(path = %dest.display(), error = %e, "could not remove abandoned fetch");
        }
    });
}

/// The inference worker is gone: clean up after the item and fail it in place.
async fn record_undeliverable(item: WorkItem) {
    let WorkItem { outcome, batch } = item;
    if let Some(path) = &outcome.staged_path {
        if let Err(e) = discard_async(path).await {
            warn!(path = %path.display(), error = %e, "could not remove staged file");
        }
    }
    warn!(batch_id = %batch.id(), index = outcome.index, "inference worker unavailable, failing item");
    batch.record(EmbeddingResult::failed(
        outcome.index,
        outcome.source,
        "inference worker unavailable",
    ));
}
