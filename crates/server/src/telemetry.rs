//! Prometheus export of pipeline metrics.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use imgembed::{IngestError, PipelineError, PipelineMetrics, SemanticError};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{ServerError, ServerResult};

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the process-wide Prometheus recorder and the pipeline observer feeding it.
///
/// Idempotent: later calls return the handle installed by the first one.
pub fn install() -> ServerResult<PrometheusHandle> {
    let mut guard = HANDLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = guard.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Config(format!("metrics recorder: {e}")))?;
    imgembed::set_pipeline_metrics(Some(Arc::new(PrometheusPipelineMetrics)));

    *guard = Some(handle.clone());
    Ok(handle)
}

/// Forwards pipeline stage events to the `metrics` facade.
#[derive(Debug, Default)]
pub struct PrometheusPipelineMetrics;

fn outcome<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

impl PipelineMetrics for PrometheusPipelineMetrics {
    fn record_fetch(&self, latency: Duration, result: Result<(), IngestError>) {
        let kind = match &result {
            Ok(()) => "none",
            Err(err) => err.kind(),
        };
        counter!("imgembed_fetch_total", "outcome" => outcome(&result), "error" => kind)
            .increment(1);
        histogram!("imgembed_fetch_seconds").record(latency.as_secs_f64());
    }

    fn record_inference(&self, latency: Duration, result: Result<(), SemanticError>) {
        counter!("imgembed_inference_total", "outcome" => outcome(&result)).increment(1);
        histogram!("imgembed_inference_seconds").record(latency.as_secs_f64());
    }

    fn record_batch(&self, latency: Duration, size: usize, result: Result<usize, &PipelineError>) {
        match result {
            Ok(failed) => {
                counter!("imgembed_batches_total", "outcome" => "ok").increment(1);
                counter!("imgembed_items_total", "outcome" => "ok")
                    .increment(size.saturating_sub(failed) as u64);
                counter!("imgembed_items_total", "outcome" => "error").increment(failed as u64);
            }
            Err(err) => {
                counter!("imgembed_batches_total", "outcome" => "error", "error" => err.kind())
                    .increment(1);
            }
        }
        histogram!("imgembed_batch_size").record(size as f64);
        histogram!("imgembed_batch_seconds").record(latency.as_secs_f64());
    }
}
