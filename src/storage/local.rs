use super::ArtifactStore;
use crate::datamodel::ArtifactLocator;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Artifact bucket kept as a directory on the local filesystem.
#[derive(Debug)]
pub struct LocalDirectoryStore {
    root: PathBuf,
    bucket: String,
    resource_id: String,
}

impl LocalDirectoryStore {
    /// Open the store described by a `file:///absolute/path` URL.
    pub async fn open(url: &str, bucket: &str, resource_id: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("Failed to parse bucket URL: {}", url))?;
        if parsed.scheme() != "file" {
            bail!("Local artifact store requires a file:// URL, got {}", url);
        }
        let root = parsed
            .to_file_path()
            .map_err(|_| anyhow!("Bucket URL {} is not an absolute file path", url))?;

        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create bucket directory {}", root.display()))?;

        Ok(Self {
            root,
            bucket: bucket.to_string(),
            resource_id: resource_id.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            bail!("Invalid object key '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalDirectoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<ArtifactLocator> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        debug!(path = %path.display(), content_type, size = body.len(), "writing object");

        let partial = partial_path(&path)?;
        let written = write_then_link(&partial, &path, &body).await;
        match tokio::fs::remove_file(&partial).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %partial.display(), error = %e, "failed to remove partial object");
            }
            _ => {}
        }
        written?;

        let uri = Url::from_file_path(&path)
            .map(|url| url.to_string())
            .map_err(|_| anyhow!("Cannot build a file URL for {}", path.display()))?;

        Ok(ArtifactLocator {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            resource_id: self.resource_id.clone(),
            uri,
        })
    }
}

/// Hidden sibling the body is staged in before it becomes visible.
fn partial_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("Object path {} has no file name", path.display()))?;
    Ok(path.with_file_name(format!(
        ".{}.{}.partial",
        name.to_string_lossy(),
        Uuid::new_v4().simple()
    )))
}

/// The object only appears once fully written. Linking fails when the
/// target exists, so an existing object is never replaced.
async fn write_then_link(partial: &Path, path: &Path, body: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    file.write_all(body)
        .await
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync {}", partial.display()))?;
    drop(file);

    tokio::fs::hard_link(partial, path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))
}
