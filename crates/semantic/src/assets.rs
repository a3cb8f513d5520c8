use std::path::{Path, PathBuf};

use tracing::info;

use crate::SemanticError;

pub(crate) fn should_fallback_to_stub(err: &SemanticError) -> bool {
    matches!(
        err,
        SemanticError::ModelNotFound(_) | SemanticError::Download(_)
    )
}

/// Returns `target` if it already exists, otherwise attempts to download `remote_url` into it.
pub(crate) async fn ensure_local_file(
    target: &Path,
    remote_url: Option<&str>,
) -> Result<PathBuf, SemanticError> {
    if tokio::fs::try_exists(target).await? {
        return Ok(target.to_path_buf());
    }

    if let Some(url) = remote_url {
        download_to_path(target, url).await?;
        return Ok(target.to_path_buf());
    }

    Err(SemanticError::ModelNotFound(target.display().to_string()))
}

/// Downloads `url` into `target`, creating parent directories as needed.
async fn download_to_path(target: &Path, url: &str) -> Result<(), SemanticError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(url, target = %target.display(), "downloading model asset");
    let response = reqwest::get(url)
        .await
        .map_err(|e| SemanticError::Download(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SemanticError::Download(format!(
            "unexpected status {status} while fetching {url}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SemanticError::Download(e.to_string()))?;

    // write next to the target first so a half-written model never looks complete
    let partial = target.with_extension("part");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, target).await?;
    Ok(())
}
