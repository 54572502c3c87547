//! Ephemeral presence store contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::listener::Listener;
use crate::Result;

/// Low-latency key/value store reflecting live connection state.
///
/// Values may be missing for users that were never seen, or disappear when
/// the store evicts a client that dropped without a clean signal.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    fn subscribe(&self, key: &str) -> Result<Listener<Option<Value>>>;

    /// Write or clear (`None`) the value under `key`.
    async fn set(&self, key: &str, value: Option<Value>) -> Result<()>;
}
