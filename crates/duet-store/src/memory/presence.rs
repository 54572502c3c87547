use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::lock;
use crate::listener::{Listener, Unsubscribe, Update};
use crate::presence::PresenceStore;
use crate::{Result, StoreError};

struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<Update<Option<Value>>>,
}

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    watchers: HashMap<String, Vec<Watcher>>,
    next_id: u64,
    subscribe_failures: HashMap<String, StoreError>,
}

impl State {
    fn notify(&mut self, key: &str) {
        let value = self.values.get(key).cloned();
        if let Some(watchers) = self.watchers.get_mut(key) {
            watchers.retain(|w| w.tx.send(Ok(value.clone())).is_ok());
        }
    }
}

/// In-memory ephemeral key/value store.
#[derive(Clone, Default)]
pub struct MemoryPresenceStore {
    state: Arc<Mutex<State>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the value under `key`, as the store does for a client that
    /// disconnected without a clean signal.
    pub fn evict(&self, key: &str) {
        let mut state = lock(&self.state);
        if state.values.remove(key).is_some() {
            state.notify(key);
        }
    }

    pub fn fail_subscriptions(&self, key: &str, err: StoreError) {
        lock(&self.state)
            .subscribe_failures
            .insert(key.to_string(), err);
    }

    pub fn emit_error(&self, key: &str, err: StoreError) {
        let mut state = lock(&self.state);
        if let Some(watchers) = state.watchers.get_mut(key) {
            watchers.retain(|w| w.tx.send(Err(err.clone())).is_ok());
        }
    }

    pub fn live_listeners(&self, key: &str) -> usize {
        lock(&self.state).watchers.get(key).map_or(0, Vec::len)
    }

    pub fn total_listeners(&self) -> usize {
        lock(&self.state).watchers.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    fn subscribe(&self, key: &str) -> Result<Listener<Option<Value>>> {
        let mut state = lock(&self.state);
        if let Some(err) = state.subscribe_failures.get(key) {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(state.values.get(key).cloned()));

        state.next_id += 1;
        let id = state.next_id;
        state
            .watchers
            .entry(key.to_string())
            .or_default()
            .push(Watcher { id, tx });
        debug!(key, listener = id, "Presence listener attached");

        let weak = Arc::downgrade(&self.state);
        let key = key.to_string();
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = lock(&state);
                if let Some(watchers) = state.watchers.get_mut(&key) {
                    watchers.retain(|w| w.id != id);
                    if watchers.is_empty() {
                        state.watchers.remove(&key);
                    }
                }
                debug!(key = %key, listener = id, "Presence listener detached");
            }
        });
        Ok(Listener::new(rx, unsubscribe))
    }

    async fn set(&self, key: &str, value: Option<Value>) -> Result<()> {
        let mut state = lock(&self.state);
        match value {
            Some(value) => {
                state.values.insert(key.to_string(), value);
            }
            None => {
                state.values.remove(key);
            }
        }
        state.notify(key);
        Ok(())
    }
}
