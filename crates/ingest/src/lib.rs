//! imgembed ingest layer
//!
//! This is where images enter the batch pipeline. A caller hands us a source
//! reference (a local path, a `file://` URI, an `http(s)://` URL, or an
//! `s3://bucket/key` object) and we
//! produce a private copy of it in a scratch directory that the inference
//! stage can read at its own pace.
//!
//! ## What we do here
//!
//! - **Stage sources** - [`StagingArea::allocate`] hands out a fresh
//!   `<uuid><.ext>` path per item, so identical basenames never collide.
//! - **Fetch** - [`Fetcher`] implementations copy local files or stream HTTP
//!   bodies and S3 objects to the staged path. [`RoutingFetcher`] picks one
//!   by scheme.
//! - **Retry** - transient network failures back off exponentially
//!   ([`RetryConfig`]).
//! - **Clean up** - [`discard`] removes staged files and treats "already gone"
//!   as success.
//!
//! Errors are typed ([`IngestError`]) and cloneable so the pipeline can attach
//! them to the failed item instead of failing the whole batch.
//!
//! ## Example
//!
//! ```no_run
//! use ingest::{discard, Fetcher, LocalFetcher, StagingArea};
//!
//! # async fn run() -> Result<(), ingest::IngestError> {
//! let staging = StagingArea::new("./tmp")?;
//! let dest = staging.allocate("images/cat.jpg");
//! LocalFetcher::new().fetch("images/cat.jpg", &dest).await?;
//! // ... hand `dest` to the model ...
//! discard(&dest).ok();
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
pub mod retry;
mod s3;
mod serde_millis;
mod staging;

pub use crate::error::IngestError;
pub use crate::fetch::{
    classify_source, Fetcher, HttpFetchConfig, HttpFetcher, LocalFetcher, RoutingFetcher,
    SourceKind,
};
pub use crate::retry::RetryConfig;
pub use crate::s3::{S3FetchConfig, S3Fetcher};
pub use crate::staging::{discard, discard_async, source_extension, StagingArea};
