use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};

use crate::blob::{BlobHandle, BlobStore};
use crate::{Result, StoreError};

/// Resolve a slash-separated blob path below `base`, rejecting anything
/// that would escape it.
fn resolve_within(base: &Path, blob_path: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(blob_path).components() {
        match component {
            Component::Normal(c) => {
                resolved.push(c);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::InvalidPath(format!(
                    "path traversal detected in '{blob_path}'"
                )));
            }
        }
    }
    if depth == 0 {
        return Err(StoreError::InvalidPath(format!("empty blob path '{blob_path}'")));
    }
    Ok(resolved)
}

/// Blob store keeping one file per blob path under a base directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FsBlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StoreError::Io(format!(
                "failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;
        let base_path = fs::canonicalize(&base_path).await.unwrap_or(base_path);

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn get(&self, blob_path: &str) -> Result<Bytes> {
        let path = resolve_within(&self.base_path, blob_path)?;
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(blob_path.to_string()));
        }
        let data = fs::read(&path).await?;
        debug!(path = blob_path, size = data.len(), "Read blob");
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, blob_path: &str, data: Bytes) -> Result<BlobHandle> {
        if data.is_empty() {
            return Err(StoreError::Rejected("empty blob".to_string()));
        }
        if data.len() > self.max_size {
            return Err(StoreError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let path = resolve_within(&self.base_path, blob_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data)
            .await
            .map_err(|e| StoreError::Io(format!("failed to write blob {blob_path}: {e}")))?;

        debug!(path = blob_path, size = data.len(), "Stored blob");
        Ok(BlobHandle::for_content(blob_path, &data))
    }

    async fn resolve_url(&self, handle: &BlobHandle) -> Result<String> {
        let path = resolve_within(&self.base_path, &handle.path)?;
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(handle.path.clone()));
        }
        Ok(format!("file://{}", path.display()))
    }
}
