//! Fetchers copy a source into a staged path chosen by the caller.
//!
//! The caller (the pipeline's fan-out pool) picks the destination through
//! [`StagingArea::allocate`](crate::StagingArea::allocate) and is responsible
//! for removing it; a fetcher only writes it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::retry::{retry_transient, RetryConfig};
use crate::s3::S3Fetcher;
use crate::IngestError;

/// Produces a local copy of `source` at `dest`.
///
/// Implementations must be safe to call from many tasks at once. On error the
/// destination may hold a partial file; the caller discards it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64, IngestError>;
}

/// How a source string should be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Local(PathBuf),
    Remote(String),
    S3 { bucket: String, key: String },
    Unsupported(String),
}

/// Classify a source reference by scheme. Plain strings are local paths.
pub fn classify_source(source: &str) -> Result<SourceKind, IngestError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(IngestError::InvalidSource("empty source".into()));
    }
    if let Some(path) = trimmed.strip_prefix("file://") {
        if path.is_empty() {
            return Err(IngestError::InvalidSource(source.to_string()));
        }
        return Ok(SourceKind::Local(PathBuf::from(path)));
    }
    match trimmed.split_once("://") {
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
            Ok(SourceKind::Remote(trimmed.to_string()))
        }
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("s3") => match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(SourceKind::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(IngestError::InvalidSource(source.to_string())),
        },
        Some((scheme, _)) => Ok(SourceKind::Unsupported(scheme.to_ascii_lowercase())),
        None => Ok(SourceKind::Local(PathBuf::from(trimmed))),
    }
}

/// Copies files from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher {
    root: Option<PathBuf>,
    max_bytes: Option<u64>,
}

impl LocalFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative source paths against `root` and refuse anything that
    /// lands outside it, absolute paths and `..` included.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn resolve(&self, source: &str, path: &Path) -> Result<PathBuf, IngestError> {
        let Some(root) = &self.root else {
            return Ok(path.to_path_buf());
        };
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| IngestError::Io(format!("{}: {e}", root.display())))?;
        let resolved = tokio::fs::canonicalize(root.join(path))
            .await
            .map_err(|e| IngestError::from_io(source, e))?;
        if !resolved.starts_with(&root) {
            return Err(IngestError::InvalidSource(format!(
                "{source} is outside {}",
                root.display()
            )));
        }
        Ok(resolved)
    }

    async fn copy_local(&self, source: &str, path: &Path, dest: &Path) -> Result<u64, IngestError> {
        let path = self.resolve(source, path).await?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| IngestError::from_io(source, e))?;
        if !meta.is_file() {
            return Err(IngestError::NotFound(source.to_string()));
        }
        if meta.len() == 0 {
            return Err(IngestError::EmptyPayload(source.to_string()));
        }
        if let Some(limit) = self.max_bytes {
            if meta.len() > limit {
                return Err(IngestError::PayloadTooLarge(format!(
                    "{source} is {} bytes, limit is {limit}",
                    meta.len()
                )));
            }
        }
        let copied = tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| IngestError::from_io(source, e))?;
        debug!(source, dest = %dest.display(), bytes = copied, "staged local source");
        Ok(copied)
    }
}

#[async_trait]
impl Fetcher for LocalFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64, IngestError> {
        match classify_source(source)? {
            SourceKind::Local(path) => self.copy_local(source, &path, dest).await,
            SourceKind::Remote(_) => Err(IngestError::UnsupportedScheme("http".into())),
            SourceKind::S3 { .. } => Err(IngestError::UnsupportedScheme("s3".into())),
            SourceKind::Unsupported(scheme) => Err(IngestError::UnsupportedScheme(scheme)),
        }
    }
}

/// Settings for [`HttpFetcher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpFetchConfig {
    /// Per-request timeout in seconds (the pipeline adds its own per-item deadline on top).
    pub request_timeout_secs: u64,
    pub max_bytes: Option<u64>,
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl Default for HttpFetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            max_bytes: Some(20 * 1024 * 1024),
            user_agent: concat!("imgembed/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Downloads `http(s)://` sources, streaming the body to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpFetchConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpFetchConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| IngestError::Transfer(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64, IngestError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Transfer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let (Some(limit), Some(len)) = (self.config.max_bytes, response.content_length()) {
            if len > limit {
                return Err(IngestError::PayloadTooLarge(format!(
                    "{url} declares {len} bytes, limit is {limit}"
                )));
            }
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| IngestError::Io(format!("{}: {e}", dest.display())))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| IngestError::Transfer(e.to_string()))?
        {
            written += chunk.len() as u64;
            if let Some(limit) = self.config.max_bytes {
                if written > limit {
                    return Err(IngestError::PayloadTooLarge(format!(
                        "{url} exceeded {limit} bytes"
                    )));
                }
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| IngestError::Io(format!("{}: {e}", dest.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| IngestError::Io(format!("{}: {e}", dest.display())))?;

        if written == 0 {
            return Err(IngestError::EmptyPayload(url.to_string()));
        }
        debug!(url, dest = %dest.display(), bytes = written, "staged remote source");
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64, IngestError> {
        let url = match classify_source(source)? {
            SourceKind::Remote(url) => url,
            SourceKind::Local(_) => return Err(IngestError::UnsupportedScheme("file".into())),
            SourceKind::S3 { .. } => return Err(IngestError::UnsupportedScheme("s3".into())),
            SourceKind::Unsupported(scheme) => return Err(IngestError::UnsupportedScheme(scheme)),
        };
        retry_transient(&self.config.retry, |_| self.download_once(&url, dest)).await
    }
}

/// Dispatches each source to the fetcher registered for its scheme.
#[derive(Debug, Clone)]
pub struct RoutingFetcher {
    local: LocalFetcher,
    http: Option<HttpFetcher>,
    s3: Option<S3Fetcher>,
}

impl RoutingFetcher {
    pub fn new(local: LocalFetcher, http: Option<HttpFetcher>) -> Self {
        Self {
            local,
            http,
            s3: None,
        }
    }

    /// Route `s3://` sources to `s3`; without it they are rejected.
    pub fn with_s3(mut self, s3: S3Fetcher) -> Self {
        self.s3 = Some(s3);
        self
    }
}

#[async_trait]
impl Fetcher for RoutingFetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64, IngestError> {
        match classify_source(source)? {
            SourceKind::Local(_) => self.local.fetch(source, dest).await,
            SourceKind::Remote(_) => match &self.http {
                Some(http) => http.fetch(source, dest).await,
                None => Err(IngestError::UnsupportedScheme("http".into())),
            },
            SourceKind::S3 { .. } => match &self.s3 {
                Some(s3) => s3.fetch(source, dest).await,
                None => Err(IngestError::UnsupportedScheme("s3".into())),
            },
            SourceKind::Unsupported(scheme) => Err(IngestError::UnsupportedScheme(scheme)),
        }
    }
}
