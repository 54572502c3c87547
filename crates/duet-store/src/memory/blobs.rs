use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::lock;
use crate::blob::{BlobHandle, BlobStore};
use crate::{Result, StoreError};

#[derive(Default)]
struct State {
    blobs: HashMap<String, Bytes>,
    put_failure: Option<StoreError>,
    resolve_failure: Option<StoreError>,
}

/// In-memory blob store. URLs take the form `memory://{path}`.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<State>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        lock(&self.state).blobs.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.state).blobs.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn fail_puts(&self, err: Option<StoreError>) {
        lock(&self.state).put_failure = err;
    }

    pub fn fail_resolves(&self, err: Option<StoreError>) {
        lock(&self.state).resolve_failure = err;
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<BlobHandle> {
        let mut state = lock(&self.state);
        if let Some(err) = &state.put_failure {
            return Err(err.clone());
        }
        let handle = BlobHandle::for_content(path, &data);
        state.blobs.insert(path.to_string(), data);
        debug!(path, size = handle.size, "Stored blob");
        Ok(handle)
    }

    async fn resolve_url(&self, handle: &BlobHandle) -> Result<String> {
        let state = lock(&self.state);
        if let Some(err) = &state.resolve_failure {
            return Err(err.clone());
        }
        if !state.blobs.contains_key(&handle.path) {
            return Err(StoreError::NotFound(handle.path.clone()));
        }
        Ok(format!("memory://{}", handle.path))
    }
}
