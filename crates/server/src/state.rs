use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use imgembed::{BatchCoordinator, PipelineConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// The batch pipeline, shared by every request
    pub coordinator: Arc<BatchCoordinator>,

    /// Prometheus renderer, `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Load the pipeline configuration and start the coordinator
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let pipeline = match &config.pipeline_config {
            Some(path) => PipelineConfig::from_file(path).map_err(imgembed::PipelineError::from)?,
            None => PipelineConfig::default(),
        };

        let metrics = if config.metrics_enabled {
            Some(crate::telemetry::install()?)
        } else {
            None
        };

        let coordinator = BatchCoordinator::start(&pipeline).await?;
        Ok(Self::with_coordinator(config, Arc::new(coordinator), metrics))
    }

    /// Wrap an already running coordinator
    pub fn with_coordinator(
        config: ServerConfig,
        coordinator: Arc<BatchCoordinator>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            coordinator,
            metrics,
        }
    }

    /// Stop the pipeline and join the inference worker
    pub async fn shutdown(&self) -> ServerResult<()> {
        let stats = self.coordinator.shutdown().await.map_err(ServerError::from)?;
        tracing::info!(
            processed = stats.processed,
            failed = stats.failed,
            "pipeline drained"
        );
        Ok(())
    }
}

/// Server metadata for health checks
#[derive(Debug, serde::Serialize)]
pub struct ServerMetadata {
    pub version: String,
    pub uptime_seconds: u64,
}
