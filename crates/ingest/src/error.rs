//! Error types produced by the ingest crate.
//!
//! Every fetch failure is typed so the pipeline can record a precise reason on
//! the failed item while still forwarding it downstream. Variants carry
//! strings rather than the underlying `io::Error`/`reqwest::Error` so the enum
//! stays `Clone + PartialEq`: a fetch outcome is cloned into metrics and logs.
//!
//! | Error | Category | Description |
//! |-------|----------|-------------|
//! | [`NotFound`](IngestError::NotFound) | Source | Local source path does not exist |
//! | [`Http`](IngestError::Http) | Source | Remote server answered with a non-2xx status |
//! | [`Transfer`](IngestError::Transfer) | Transport | Connection/body failure while downloading |
//! | [`Timeout`](IngestError::Timeout) | Transport | Fetch exceeded the per-item deadline |
//! | [`PayloadTooLarge`](IngestError::PayloadTooLarge) | Policy | Source exceeds `max_bytes` |
//! | [`EmptyPayload`](IngestError::EmptyPayload) | Policy | Source has zero bytes |
//! | [`UnsupportedScheme`](IngestError::UnsupportedScheme) | Request | No fetcher handles the scheme |
//! | [`InvalidSource`](IngestError::InvalidSource) | Request | Source string cannot be interpreted |
//! | [`Io`](IngestError::Io) | Staging | Local filesystem failure |
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching a source into the staging area.
///
/// ```rust
/// use ingest::IngestError;
///
/// let err = IngestError::Http { status: 404, url: "https://img.example/cat.jpg".into() };
/// assert!(err.to_string().contains("404"));
/// assert!(!err.is_transient());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IngestError {
    /// Local source does not exist.
    #[error("source not found: {0}")]
    NotFound(String),

    /// Remote server returned a non-success status.
    #[error("unexpected status {status} while fetching {url}")]
    Http { status: u16, url: String },

    /// Connection, TLS, or body streaming failure.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The fetch did not complete within the per-item deadline.
    #[error("fetch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Source is larger than the configured limit.
    #[error("payload exceeds size limit: {0}")]
    PayloadTooLarge(String),

    /// Source contained no bytes.
    #[error("source is empty: {0}")]
    EmptyPayload(String),

    /// No fetcher is registered for the source scheme.
    #[error("unsupported source scheme: {0}")]
    UnsupportedScheme(String),

    /// Source string is blank or malformed.
    #[error("invalid source reference: {0}")]
    InvalidSource(String),

    /// Filesystem failure while staging.
    #[error("io error: {0}")]
    Io(String),
}

impl IngestError {
    /// Whether retrying the same fetch could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Transfer(_) | IngestError::Timeout(_) => true,
            IngestError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::NotFound(_) => "not_found",
            IngestError::Http { .. } => "http",
            IngestError::Transfer(_) => "transfer",
            IngestError::Timeout(_) => "timeout",
            IngestError::PayloadTooLarge(_) => "too_large",
            IngestError::EmptyPayload(_) => "empty",
            IngestError::UnsupportedScheme(_) => "unsupported_scheme",
            IngestError::InvalidSource(_) => "invalid_source",
            IngestError::Io(_) => "io",
        }
    }

    pub(crate) fn from_io(source: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            IngestError::NotFound(source.to_string())
        } else {
            IngestError::Io(format!("{source}: {err}"))
        }
    }
}
