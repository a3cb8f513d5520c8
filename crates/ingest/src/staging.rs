//! Scratch-area management for staged copies of fetched sources.
//!
//! Every item in a batch gets its own staged file named `<uuid-v4><.ext>`, so
//! two items pointing at sources with the same basename never collide. The
//! pipeline owns each staged file until inference is done with it and then
//! calls [`discard`].

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::IngestError;

/// Writable directory holding staged copies of fetched sources.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Use `root` as the staging directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| IngestError::Io(format!("{}: {e}", root.display())))?;
        debug!(root = %root.display(), "staging area ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh, unique path for `source`. Nothing is created on disk.
    pub fn allocate(&self, source: &str) -> PathBuf {
        let mut name = Uuid::new_v4().to_string();
        if let Some(ext) = source_extension(source) {
            name.push('.');
            name.push_str(&ext);
        }
        self.root.join(name)
    }

    /// Number of entries currently in the staging directory.
    pub fn staged_count(&self) -> Result<usize, IngestError> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| IngestError::Io(format!("{}: {e}", self.root.display())))?;
        Ok(entries.filter_map(Result::ok).count())
    }
}

/// Remove a staged file. A file that is already gone is not an error.
pub fn discard(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to discard staged file");
            Err(err)
        }
    }
}

/// Async flavour of [`discard`] for callers already on the runtime.
pub async fn discard_async(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to discard staged file");
            Err(err)
        }
    }
}

/// Extension of the last path segment of `source`, ignoring query and fragment.
///
/// Only short alphanumeric extensions are kept; anything else is dropped so a
/// hostile source string cannot smuggle separators into the staged name.
pub fn source_extension(source: &str) -> Option<String> {
    let without_suffix = source.split(['?', '#']).next().unwrap_or(source);
    let segment = without_suffix
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
