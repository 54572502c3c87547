//! Blob store contract.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub path: String,
    pub size: usize,
    /// BLAKE3 hash of the content, hex encoded.
    pub content_hash: String,
}

impl BlobHandle {
    pub fn for_content(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            size: data.len(),
            content_hash: blake3::hash(data).to_hex().to_string(),
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` at `path`, replacing anything already there.
    async fn put(&self, path: &str, data: Bytes) -> Result<BlobHandle>;

    /// Resolve a handle to a URL other clients can fetch.
    async fn resolve_url(&self, handle: &BlobHandle) -> Result<String>;
}
