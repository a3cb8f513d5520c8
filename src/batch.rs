//! Per-batch bookkeeping: item references, per-item outcomes, the shared result buffer and
//! the one-shot completion barrier.
//!
//! Each batch owns a fresh [`BatchContext`]. Every queued item carries an `Arc` to its
//! context, so results from overlapping batches can never land in the wrong buffer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{IngestError, PipelineError};

/// Vector value reported for items whose fetch or inference failed.
pub const SENTINEL_VALUE: f32 = -1.0;

/// Identifier attached to every log line and error of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One entry of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub index: usize,
    pub source: String,
}

impl ItemRef {
    pub fn new(index: usize, source: impl Into<String>) -> Self {
        Self {
            index,
            source: source.into(),
        }
    }

    /// Number `sources` in order.
    pub fn enumerate<I, S>(sources: I) -> Vec<ItemRef>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| ItemRef::new(index, source))
            .collect()
    }
}

/// What the fan-out pool produced for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub index: usize,
    pub source: String,
    /// Present only when the fetch succeeded.
    pub staged_path: Option<PathBuf>,
    pub error: Option<IngestError>,
}

impl FetchOutcome {
    pub fn staged(index: usize, source: String, staged_path: PathBuf) -> Self {
        Self {
            index,
            source,
            staged_path: Some(staged_path),
            error: None,
        }
    }

    pub fn failed(index: usize, source: String, error: IngestError) -> Self {
        Self {
            index,
            source,
            staged_path: None,
            error: Some(error),
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none() && self.staged_path.is_some()
    }
}

/// Final per-item result recorded into the batch buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub index: usize,
    pub vector: Vec<f32>,
    pub source: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddingResult {
    pub fn success(index: usize, source: String, vector: Vec<f32>) -> Self {
        Self {
            index,
            vector,
            source,
            ok: true,
            error: None,
        }
    }

    /// Failed item: sentinel vector plus the reason.
    pub fn failed(index: usize, source: String, reason: impl Into<String>) -> Self {
        Self {
            index,
            vector: vec![SENTINEL_VALUE],
            source,
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// What happened when a result was offered to a [`BatchContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored; the batch still has outstanding items.
    Recorded,
    /// Stored, and it was the last one: the barrier has been released.
    Completed,
    /// An entry for this index already exists. Ignored.
    Duplicate,
    /// Index outside `0..expected`. Ignored.
    OutOfRange,
}

struct BatchBuffer {
    results: BTreeMap<usize, EmbeddingResult>,
    release: Option<oneshot::Sender<()>>,
}

/// Shared state of one in-flight batch.
pub struct BatchContext {
    id: BatchId,
    expected: usize,
    buffer: Mutex<BatchBuffer>,
}

impl BatchContext {
    /// Create the context for a batch of `expected` items and the barrier its caller waits on.
    pub fn new(expected: usize) -> (Arc<Self>, CompletionBarrier) {
        let id = BatchId::new();
        let (tx, rx) = oneshot::channel();
        let release = if expected == 0 {
            let _ = tx.send(());
            None
        } else {
            Some(tx)
        };
        let ctx = Arc::new(Self {
            id,
            expected,
            buffer: Mutex::new(BatchBuffer {
                results: BTreeMap::new(),
                release,
            }),
        });
        (ctx, CompletionBarrier { batch_id: id, rx })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of results recorded so far.
    pub fn received(&self) -> usize {
        self.lock().results.len()
    }

    /// Store `result`; release the barrier when it was the last outstanding item.
    ///
    /// Insert, count check and release happen under one lock, so the barrier is released
    /// at most once and never before the buffer is full.
    pub fn record(&self, result: EmbeddingResult) -> RecordOutcome {
        let index = result.index;
        let mut buffer = self.lock();

        if index >= self.expected {
            warn!(batch_id = %self.id, index, expected = self.expected, "result index out of range");
            return RecordOutcome::OutOfRange;
        }
        if buffer.results.contains_key(&index) {
            warn!(batch_id = %self.id, index, "duplicate result ignored");
            return RecordOutcome::Duplicate;
        }

        buffer.results.insert(index, result);
        if buffer.results.len() < self.expected {
            return RecordOutcome::Recorded;
        }

        if let Some(tx) = buffer.release.take() {
            // the waiter may have timed out and gone away
            if tx.send(()).is_err() {
                debug!(batch_id = %self.id, "batch completed after its caller stopped waiting");
            }
        }
        RecordOutcome::Completed
    }

    /// Drain the buffer. Call after the barrier released.
    pub fn take_results(&self) -> BTreeMap<usize, EmbeddingResult> {
        std::mem::take(&mut self.lock().results)
    }

    fn lock(&self) -> MutexGuard<'_, BatchBuffer> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchContext")
            .field("id", &self.id)
            .field("expected", &self.expected)
            .field("received", &self.received())
            .finish()
    }
}

/// One-shot gate the caller of a batch suspends on. Consumed by [`wait`](Self::wait).
#[derive(Debug)]
pub struct CompletionBarrier {
    batch_id: BatchId,
    rx: oneshot::Receiver<()>,
}

impl CompletionBarrier {
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Suspend until every item of the batch has a result.
    ///
    /// `None` waits forever. If the context is dropped without completing (the pipeline
    /// went away underneath the batch) this reports [`PipelineError::WorkerUnavailable`].
    pub async fn wait(self, timeout: Option<Duration>) -> Result<(), PipelineError> {
        let batch_id = self.batch_id;
        let released = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| PipelineError::BarrierTimeout {
                    batch_id,
                    timeout: limit,
                })?,
            None => self.rx.await,
        };
        released.map_err(|_| PipelineError::WorkerUnavailable)
    }
}
