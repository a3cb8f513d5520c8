//! `s3://bucket/key` sources, read through [`object_store`].
//!
//! One store client is built lazily per bucket and reused for every later
//! fetch from that bucket. Credentials and defaults come from the standard
//! `AWS_*` environment variables; [`S3FetchConfig`] only overrides them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::fetch::{classify_source, Fetcher, SourceKind};
use crate::retry::{retry_transient, RetryConfig};
use crate::IngestError;

/// Settings for [`S3Fetcher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct S3FetchConfig {
    pub region: Option<String>,
    /// Endpoint of an S3-compatible store (MinIO, R2, localstack).
    pub endpoint: Option<String>,
    /// Accept plain `http://` endpoints.
    pub allow_http: bool,
    pub max_bytes: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for S3FetchConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            allow_http: false,
            max_bytes: Some(20 * 1024 * 1024),
            retry: RetryConfig::default(),
        }
    }
}

/// Streams S3 objects to the staged path.
#[derive(Debug, Clone)]
pub struct S3Fetcher {
    config: S3FetchConfig,
    stores: Arc<Mutex<HashMap<String, Arc<dyn ObjectStore>>>>,
}

impl S3Fetcher {
    pub fn new(config: S3FetchConfig) -> Self {
        Self {
            config,
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Serve `bucket` from an already configured store instead of building one.
    pub fn with_bucket_store(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(bucket.into(), store);
        self
    }

    pub fn config(&self) -> &S3FetchConfig {
        &self.config
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, IngestError> {
        let mut stores = self
            .stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &self.config.region {
            builder = builder.with_region(region.clone());
        }
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if self.config.allow_http {
            builder = builder.with_allow_http(true);
        }
        let store: Arc<dyn ObjectStore> = Arc::new(
            builder
                .build()
                .map_err(|e| IngestError::InvalidSource(format!("s3://{bucket}: {e}")))?,
        );
        debug!(bucket, "built s3 client");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }

    async fn download_once(
        &self,
        store: &dyn ObjectStore,
        location: &ObjectPath,
        source: &str,
        dest: &Path,
    ) -> Result<u64, IngestError> {
        let object = store
            .get(location)
            .await
            .map_err(|e| store_error(source, e))?;

        if let Some(limit) = self.config.max_bytes {
            if object.meta.size > limit {
                return Err(IngestError::PayloadTooLarge(format!(
                    "{source} is {} bytes, limit is {limit}",
                    object.meta.size
                )));
            }
        }

        let mut body = object.into_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| IngestError::Io(format!("{}: {e}", dest.display())))?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| store_error(source, e))?;
            written += chunk.len() as u64;
            if let Some(limit) = self.config.max_bytes {
                if written > limit {
                    return Err(IngestError::PayloadTooLarge(format!(
                        "{source} exceeded {limit} bytes"
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
            return Err(IngestError::EmptyPayload(source.to_string()));
        }
        debug!(source, dest = %dest.display(), bytes = written, "staged s3 object");
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for S3Fetcher {
    async fn fetch(&self, source: &str, dest: &Path) -> Result<u64, IngestError> {
        let (bucket, key) = match classify_source(source)? {
            SourceKind::S3 { bucket, key } => (bucket, key),
            SourceKind::Local(_) => return Err(IngestError::UnsupportedScheme("file".into())),
            SourceKind::Remote(_) => return Err(IngestError::UnsupportedScheme("http".into())),
            SourceKind::Unsupported(scheme) => return Err(IngestError::UnsupportedScheme(scheme)),
        };
        let location = ObjectPath::parse(&key)
            .map_err(|e| IngestError::InvalidSource(format!("{source}: {e}")))?;
        let store = self.store_for(&bucket)?;
        retry_transient(&self.config.retry, |_| {
            self.download_once(store.as_ref(), &location, source, dest)
        })
        .await
    }
}

/// Missing objects and auth failures are permanent; everything else may be retried.
fn store_error(source: &str, err: object_store::Error) -> IngestError {
    match err {
        object_store::Error::NotFound { .. } => IngestError::NotFound(source.to_string()),
        object_store::Error::PermissionDenied { .. } => IngestError::Http {
            status: 403,
            url: source.to_string(),
        },
        object_store::Error::Unauthenticated { .. } => IngestError::Http {
            status: 401,
            url: source.to_string(),
        },
        other => IngestError::Transfer(other.to_string()),
    }
}
