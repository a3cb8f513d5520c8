//! YAML configuration for the batch pipeline.
//!
//! Every stage has its own section; anything omitted falls back to the defaults below, so an
//! empty document (just `version`) is a working configuration.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! # imgembed pipeline configuration
//! version: "1.0"
//! name: "local dev"
//!
//! fetch:
//!   workers: 4              # concurrent fetches
//!   timeout_secs: 60        # per item, at the fetcher boundary
//!   local_root: "./images"  # relative paths resolve against this
//!   max_bytes: 20971520
//!   allow_remote: true
//!   http:
//!     request_timeout_secs: 30
//!     retry:
//!       max_retries: 2
//!       base_delay: 200     # milliseconds
//!   allow_s3: true
//!   s3:                     # credentials come from AWS_* env vars
//!     region: "eu-west-1"
//!     endpoint: "http://localhost:9000"
//!     allow_http: true
//!
//! staging:
//!   dir: "./tmp"
//!
//! inference:
//!   queue_capacity: 64
//!
//! batch:
//!   max_size: 256
//!   timeout_secs: 300       # 0 waits forever
//!   max_concurrent: 4
//!
//! semantic:
//!   mode: "thumbnail"
//!   thumbnail_size: 32
//!   normalize: true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ingest::{
    HttpFetchConfig, HttpFetcher, IngestError, LocalFetcher, RoutingFetcher, S3FetchConfig,
    S3Fetcher,
};
use semantic::SemanticConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration for the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Configuration format version
    #[serde(default = "default_config_version")]
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub fetch: FetchYamlConfig,

    #[serde(default)]
    pub staging: StagingYamlConfig,

    #[serde(default)]
    pub inference: InferenceYamlConfig,

    #[serde(default)]
    pub batch: BatchYamlConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub semantic: SemanticConfig,
}

impl PipelineConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.fetch.validate()?;
        self.staging.validate()?;
        self.inference.validate()?;
        self.batch.validate()?;
        self.semantic
            .validate()
            .map_err(|e| ConfigLoadError::Validation(format!("semantic: {e}")))?;

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            name: None,
            fetch: FetchYamlConfig::default(),
            staging: StagingYamlConfig::default(),
            inference: InferenceYamlConfig::default(),
            batch: BatchYamlConfig::default(),
            semantic: SemanticConfig::default(),
        }
    }
}

/// Fan-out fetch stage YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchYamlConfig {
    /// Fetches allowed to run at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-item deadline; a fetch running longer fails the item
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Base directory for relative local paths
    #[serde(default)]
    pub local_root: Option<PathBuf>,

    /// Largest local file accepted
    #[serde(default = "default_max_bytes")]
    pub max_bytes: Option<u64>,

    /// Enable `http(s)://` sources
    #[serde(default = "true_value")]
    pub allow_remote: bool,

    #[serde(default)]
    pub http: HttpFetchConfig,

    /// Enable `s3://bucket/key` sources
    #[serde(default = "true_value")]
    pub allow_s3: bool,

    #[serde(default)]
    pub s3: S3FetchConfig,
}

impl FetchYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.workers == 0 {
            return Err(ConfigLoadError::Validation(
                "fetch.workers must be >= 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "fetch.timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "fetch.http.request_timeout_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Scheme-routing fetcher for these settings.
    pub fn build_fetcher(&self) -> Result<RoutingFetcher, IngestError> {
        let mut local = LocalFetcher::new().with_max_bytes(self.max_bytes);
        if let Some(root) = &self.local_root {
            local = local.with_root(root.clone());
        }
        let http = if self.allow_remote {
            Some(HttpFetcher::new(self.http.clone())?)
        } else {
            None
        };
        let mut fetcher = RoutingFetcher::new(local, http);
        if self.allow_s3 {
            fetcher = fetcher.with_s3(S3Fetcher::new(self.s3.clone()));
        }
        Ok(fetcher)
    }
}

impl Default for FetchYamlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_secs: default_fetch_timeout(),
            local_root: None,
            max_bytes: default_max_bytes(),
            allow_remote: true,
            http: HttpFetchConfig::default(),
            allow_s3: true,
            s3: S3FetchConfig::default(),
        }
    }
}

/// Staging area YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagingYamlConfig {
    /// Scratch directory for staged copies; created on startup
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl StagingYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.dir.as_os_str().is_empty() {
            return Err(ConfigLoadError::Validation(
                "staging.dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StagingYamlConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

/// Inference worker YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceYamlConfig {
    /// Capacity of the queue between the fetch pool and the worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl InferenceYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.queue_capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "inference.queue_capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InferenceYamlConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Batch coordination YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchYamlConfig {
    /// Largest accepted batch; bigger requests are rejected before any fetch
    #[serde(default = "default_max_batch_size")]
    pub max_size: usize,

    /// How long a caller waits on the completion barrier; `0` waits forever
    #[serde(default = "default_batch_timeout")]
    pub timeout_secs: u64,

    /// Batches processed at once; further batches wait for a slot
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl BatchYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_size == 0 {
            return Err(ConfigLoadError::Validation(
                "batch.max_size must be >= 1".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigLoadError::Validation(
                "batch.max_concurrent must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for BatchYamlConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_batch_size(),
            timeout_secs: default_batch_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_config_version() -> String {
    "1.0".to_string()
}
fn true_value() -> bool {
    true
}
fn default_workers() -> usize {
    4
}
fn default_fetch_timeout() -> u64 {
    60
}
fn default_max_bytes() -> Option<u64> {
    Some(20 * 1024 * 1024)
}
fn default_staging_dir() -> PathBuf {
    PathBuf::from("./tmp")
}
fn default_queue_capacity() -> usize {
    64
}
fn default_max_batch_size() -> usize {
    256
}
fn default_batch_timeout() -> u64 {
    300
}
fn default_max_concurrent() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "test config"
fetch:
  workers: 8
  local_root: "/data/images"
batch:
  max_size: 32
"#;

        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("test config".to_string()));
        assert_eq!(config.fetch.workers, 8);
        assert_eq!(config.fetch.local_root, Some(PathBuf::from("/data/images")));
        assert_eq!(config.fetch.timeout_secs, 60);
        assert_eq!(config.batch.max_size, 32);
        assert_eq!(config.batch.max_concurrent, 4);
        assert_eq!(config.semantic.mode, "thumbnail");
    }

    #[test]
    fn test_load_from_file() {
        let yaml = r#"
version: "1"
staging:
  dir: "/var/tmp/imgembed"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = PipelineConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.staging.dir, PathBuf::from("/var/tmp/imgembed"));
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.version, "1.0");
        assert!(config.name.is_none());
        assert_eq!(config.fetch.workers, 4);
        assert_eq!(config.inference.queue_capacity, 64);
        assert_eq!(config.batch.timeout(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_fetch_validation() {
        let yaml = r#"
version: "1.0"
fetch:
  workers: 0
"#;

        let result = PipelineConfig::from_yaml(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("workers must be >= 1"));
    }

    #[test]
    fn test_semantic_validation() {
        let yaml = r#"
version: "1.0"
semantic:
  mode: "api"
"#;

        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));
        assert!(err.to_string().contains("semantic"));
    }

    #[test]
    fn test_unsupported_version() {
        let err = PipelineConfig::from_yaml("version: \"2.0\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedVersion(v) if v == "2.0"));
    }

    #[test]
    fn test_zero_batch_timeout_waits_forever() {
        let config = PipelineConfig::from_yaml("batch:\n  timeout_secs: 0\n").unwrap();
        assert_eq!(config.batch.timeout(), None);
    }

    #[test]
    fn test_retry_delays_are_milliseconds() {
        let yaml = r#"
fetch:
  http:
    retry:
      max_retries: 5
      base_delay: 50
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.fetch.http.retry.max_retries, 5);
        assert_eq!(
            config.fetch.http.retry.base_delay,
            Duration::from_millis(50)
        );
        // untouched fields keep their defaults
        assert_eq!(config.fetch.http.request_timeout_secs, 30);
    }

    #[test]
    fn test_build_fetcher_respects_allow_remote() {
        let config = FetchYamlConfig {
            allow_remote: false,
            ..Default::default()
        };
        assert!(config.build_fetcher().is_ok());
    }

    #[test]
    fn test_s3_section() {
        let yaml = r#"
version: "1.0"
fetch:
  s3:
    region: "eu-west-1"
    endpoint: "http://localhost:9000"
    allow_http: true
    max_bytes: 1024
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert!(config.fetch.allow_s3);
        assert_eq!(config.fetch.s3.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            config.fetch.s3.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(config.fetch.s3.allow_http);
        assert_eq!(config.fetch.s3.max_bytes, Some(1024));
        assert_eq!(config.fetch.s3.retry, ingest::RetryConfig::default());
    }

    #[tokio::test]
    async fn test_build_fetcher_respects_allow_s3() {
        use ingest::Fetcher;

        let dir = tempfile::tempdir().unwrap();
        let config = FetchYamlConfig {
            allow_s3: false,
            ..Default::default()
        };
        let fetcher = config.build_fetcher().unwrap();
        let err = fetcher
            .fetch("s3://photos/cat.jpg", &dir.path().join("out"))
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::UnsupportedScheme("s3".into()));
    }
}
