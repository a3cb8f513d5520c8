//! imgembed server - HTTP API for the batch image-embedding pipeline
//!
//! Exposes a [`imgembed::BatchCoordinator`] over axum. One coordinator is
//! shared by every request; batches from concurrent requests are fetched in
//! parallel and embedded one item at a time by the single inference worker.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe (503 while draining)
//! - `GET /metrics` - Prometheus metrics
//! - `POST /predict` - `{"path": [..]}` to an ordered array of embeddings
//! - `POST /api/v1/embed` - same batch, wrapped with success/failure counts
//! - `GET /api/v1/metadata` - Server version and uptime

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
