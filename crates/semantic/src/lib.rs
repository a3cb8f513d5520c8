//! imgembed embedding models
//!
//! This crate turns a staged image file into a dense vector. It knows nothing
//! about batches, queues or HTTP; it just hands the pipeline something that
//! implements [`EmbeddingModel`].
//!
//! We support a few modes:
//!
//! - **thumbnail** - Decode, shrink to an N×N grayscale thumbnail, centre and
//!   normalise. No model files needed, so this is the default.
//! - **onnx** - Run a local image encoder (ResNet-style) through ONNX Runtime.
//!   Needs the `onnx` cargo feature and a model file (downloaded on startup
//!   when `model_url` is set).
//! - **fast** - Deterministic stub hashed from the file bytes. Great for tests.
//!
//! If ONNX assets are missing you can opt into falling back to the stub with
//! `fallback_to_stub` instead of refusing to start.
//!
//! ## Threading notes
//!
//! Models are not `Send`. Resolve assets with [`ModelSpec::prepare`] on the
//! async runtime, move the `ModelSpec` to the thread that will own the model, and
//! call [`ModelSpec::load`] there.
//!
//! ## Quick example
//!
//! ```no_run
//! use semantic::{ModelSpec, SemanticConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), semantic::SemanticError> {
//!     let spec = ModelSpec::prepare(&SemanticConfig::default()).await?;
//!     let worker = std::thread::spawn(move || {
//!         let mut model = spec.load()?;
//!         model.embed("cat.jpg".as_ref())
//!     });
//!     let _vector = worker.join().expect("worker panicked")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

mod assets;
mod model;
mod normalize;
#[cfg(feature = "onnx")]
mod onnx;
mod stub;
mod thumbnail;

pub use crate::config::SemanticConfig;
pub use crate::error::SemanticError;
pub use crate::model::{EmbeddingModel, ModelSpec};
#[cfg(feature = "onnx")]
pub use crate::onnx::OnnxImageModel;
pub use crate::stub::StubModel;
pub use crate::thumbnail::ThumbnailModel;
