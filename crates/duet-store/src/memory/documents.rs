use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use duet_shared::paths::{CollectionPath, DocPath};

use super::lock;
use crate::document::{Document, DocumentStore, FieldDelta, FieldOp};
use crate::listener::{Listener, Unsubscribe, Update};
use crate::{Result, StoreError};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// One applied write, as recorded in the store's write log.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub kind: WriteKind,
    pub path: String,
    pub delta: FieldDelta,
}

impl WriteRecord {
    /// Whether this write atomically added `value` to the array `field`.
    pub fn adds(&self, field: &str, value: &Value) -> bool {
        matches!(
            self.delta.get(field),
            Some(FieldOp::ArrayUnion(values)) if values.contains(value)
        )
    }

    /// Whether this write atomically removed `value` from the array `field`.
    pub fn removes(&self, field: &str, value: &Value) -> bool {
        matches!(
            self.delta.get(field),
            Some(FieldOp::ArrayRemove(values)) if values.contains(value)
        )
    }
}

struct StoredDoc {
    fields: Map<String, Value>,
    seq: u64,
}

struct DocWatcher {
    id: u64,
    tx: mpsc::UnboundedSender<Update<Option<Document>>>,
}

struct CollectionWatcher {
    id: u64,
    order_by: String,
    tx: mpsc::UnboundedSender<Update<Vec<Document>>>,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, StoredDoc>,
    doc_watchers: HashMap<String, Vec<DocWatcher>>,
    collection_watchers: HashMap<String, Vec<CollectionWatcher>>,
    next_id: u64,
    writes: Vec<WriteRecord>,
    write_failure: Option<StoreError>,
    field_failures: HashMap<String, StoreError>,
    subscribe_failures: HashMap<String, StoreError>,
    manual_ack: bool,
    unacked: Vec<(String, String)>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn snapshot(&self, path: &str) -> Option<Document> {
        self.docs.get(path).map(|doc| Document {
            id: doc_id(path).to_string(),
            fields: doc.fields.clone(),
        })
    }

    fn collection(&self, collection: &str, order_by: &str) -> Vec<Document> {
        let mut members: Vec<(&String, &StoredDoc)> = self
            .docs
            .iter()
            .filter(|(path, _)| parent_of(path) == Some(collection))
            .collect();

        members.sort_by(|(_, a), (_, b)| {
            let ka = order_key(&a.fields, order_by);
            let kb = order_key(&b.fields, order_by);
            match (ka, kb) {
                (Some(x), Some(y)) => x.cmp(&y).then(a.seq.cmp(&b.seq)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.seq.cmp(&b.seq),
            }
        });

        members
            .into_iter()
            .map(|(path, doc)| Document {
                id: doc_id(path).to_string(),
                fields: doc.fields.clone(),
            })
            .collect()
    }

    fn notify(&mut self, path: &str) {
        let snapshot = self.snapshot(path);
        if let Some(watchers) = self.doc_watchers.get_mut(path) {
            watchers.retain(|w| w.tx.send(Ok(snapshot.clone())).is_ok());
        }

        let Some(parent) = parent_of(path).map(str::to_string) else {
            return;
        };
        let Some(mut watchers) = self.collection_watchers.remove(&parent) else {
            return;
        };
        watchers.retain(|w| {
            let docs = self.collection(&parent, &w.order_by);
            w.tx.send(Ok(docs)).is_ok()
        });
        self.collection_watchers.insert(parent, watchers);
    }

    fn check_writable(&self, delta: &FieldDelta) -> Result<()> {
        if let Some(err) = &self.write_failure {
            return Err(err.clone());
        }
        match delta
            .ops()
            .iter()
            .find_map(|(name, _)| self.field_failures.get(name))
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory document store with live queries.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<State>>,
    clock: Clock,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock: Arc::new(Utc::now),
        }
    }

    /// Use `clock` to resolve server timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Create or replace a document wholesale. `fields` must be a JSON object.
    pub fn insert(&self, path: &DocPath, fields: Value) -> Result<()> {
        let Value::Object(fields) = fields else {
            return Err(StoreError::Decode(format!("{path}: document must be an object")));
        };
        let mut state = lock(&self.state);
        let seq = state.next_id();
        state
            .docs
            .insert(path.as_str().to_string(), StoredDoc { fields, seq });
        state.notify(path.as_str());
        Ok(())
    }

    /// Current content of a document, if it exists.
    pub fn document(&self, path: &DocPath) -> Option<Value> {
        lock(&self.state)
            .docs
            .get(path.as_str())
            .map(|doc| Value::Object(doc.fields.clone()))
    }

    /// Every write applied so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.state).writes.clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    /// Make every subsequent `create`/`update` fail with `err` (or succeed
    /// again with `None`).
    pub fn fail_writes(&self, err: Option<StoreError>) {
        lock(&self.state).write_failure = err;
    }

    /// Make every subsequent write that touches `field` fail with `err`.
    /// Writes to other fields are unaffected.
    pub fn fail_writes_touching(&self, field: &str, err: StoreError) {
        lock(&self.state)
            .field_failures
            .insert(field.to_string(), err);
    }

    /// Make subscriptions to `path` fail to attach.
    pub fn fail_subscriptions(&self, path: &str, err: StoreError) {
        lock(&self.state)
            .subscribe_failures
            .insert(path.to_string(), err);
    }

    /// Deliver `err` to every listener attached to `path`.
    pub fn emit_error(&self, path: &str, err: StoreError) {
        let mut state = lock(&self.state);
        if let Some(watchers) = state.doc_watchers.get_mut(path) {
            watchers.retain(|w| w.tx.send(Err(err.clone())).is_ok());
        }
        if let Some(watchers) = state.collection_watchers.get_mut(path) {
            watchers.retain(|w| w.tx.send(Err(err.clone())).is_ok());
        }
    }

    /// Hold server timestamps as `null` until [`acknowledge_writes`] runs,
    /// like a latency-compensated snapshot of a pending write.
    ///
    /// [`acknowledge_writes`]: MemoryDocumentStore::acknowledge_writes
    pub fn set_manual_ack(&self, manual: bool) {
        lock(&self.state).manual_ack = manual;
    }

    /// Resolve every pending server timestamp and notify listeners.
    pub fn acknowledge_writes(&self) {
        let stamp = timestamp_value((self.clock)());
        let mut state = lock(&self.state);
        let pending = std::mem::take(&mut state.unacked);
        let mut touched: Vec<String> = Vec::new();

        for (path, field) in pending {
            if let Some(doc) = state.docs.get_mut(&path) {
                if doc.fields.get(&field).map_or(true, Value::is_null) {
                    doc.fields.insert(field, stamp.clone());
                }
                if !touched.contains(&path) {
                    touched.push(path);
                }
            }
        }

        for path in touched {
            state.notify(&path);
        }
    }

    /// Listeners currently attached to exactly `path` (document or collection).
    pub fn live_listeners(&self, path: &str) -> usize {
        let state = lock(&self.state);
        state.doc_watchers.get(path).map_or(0, Vec::len)
            + state.collection_watchers.get(path).map_or(0, Vec::len)
    }

    pub fn total_listeners(&self) -> usize {
        let state = lock(&self.state);
        state.doc_watchers.values().map(Vec::len).sum::<usize>()
            + state.collection_watchers.values().map(Vec::len).sum::<usize>()
    }

    fn stamp(&self, state: &State) -> Option<Value> {
        if state.manual_ack {
            None
        } else {
            Some(timestamp_value((self.clock)()))
        }
    }

    fn detach_document(state: &Weak<Mutex<State>>, path: String, id: u64) -> Unsubscribe {
        let state = state.clone();
        Unsubscribe::new(move || {
            if let Some(state) = state.upgrade() {
                let mut state = lock(&state);
                if let Some(watchers) = state.doc_watchers.get_mut(&path) {
                    watchers.retain(|w| w.id != id);
                    if watchers.is_empty() {
                        state.doc_watchers.remove(&path);
                    }
                }
                debug!(path = %path, listener = id, "Document listener detached");
            }
        })
    }

    fn detach_collection(state: &Weak<Mutex<State>>, path: String, id: u64) -> Unsubscribe {
        let state = state.clone();
        Unsubscribe::new(move || {
            if let Some(state) = state.upgrade() {
                let mut state = lock(&state);
                if let Some(watchers) = state.collection_watchers.get_mut(&path) {
                    watchers.retain(|w| w.id != id);
                    if watchers.is_empty() {
                        state.collection_watchers.remove(&path);
                    }
                }
                debug!(path = %path, listener = id, "Collection listener detached");
            }
        })
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        Ok(lock(&self.state).snapshot(path.as_str()))
    }

    fn subscribe_document(&self, path: &DocPath) -> Result<Listener<Option<Document>>> {
        let mut state = lock(&self.state);
        if let Some(err) = state.subscribe_failures.get(path.as_str()) {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(state.snapshot(path.as_str())));

        let id = state.next_id();
        state
            .doc_watchers
            .entry(path.as_str().to_string())
            .or_default()
            .push(DocWatcher { id, tx });

        debug!(path = %path, listener = id, "Document listener attached");
        let unsubscribe =
            Self::detach_document(&Arc::downgrade(&self.state), path.as_str().to_string(), id);
        Ok(Listener::new(rx, unsubscribe))
    }

    fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order_by: &str,
    ) -> Result<Listener<Vec<Document>>> {
        let mut state = lock(&self.state);
        if let Some(err) = state.subscribe_failures.get(path.as_str()) {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(state.collection(path.as_str(), order_by)));

        let id = state.next_id();
        state
            .collection_watchers
            .entry(path.as_str().to_string())
            .or_default()
            .push(CollectionWatcher {
                id,
                order_by: order_by.to_string(),
                tx,
            });

        debug!(path = %path, listener = id, "Collection listener attached");
        let unsubscribe =
            Self::detach_collection(&Arc::downgrade(&self.state), path.as_str().to_string(), id);
        Ok(Listener::new(rx, unsubscribe))
    }

    async fn create(&self, collection: &CollectionPath, fields: FieldDelta) -> Result<String> {
        let mut state = lock(&self.state);
        state.check_writable(&fields)?;

        let id = Uuid::new_v4().simple().to_string();
        let path = collection.doc(&id);
        let stamp = self.stamp(&state);

        let mut doc = Map::new();
        let pending = apply_delta(&mut doc, &fields, stamp.as_ref());
        let seq = state.next_id();

        state
            .unacked
            .extend(pending.into_iter().map(|f| (path.as_str().to_string(), f)));
        state.docs.insert(
            path.as_str().to_string(),
            StoredDoc { fields: doc, seq },
        );
        state.writes.push(WriteRecord {
            kind: WriteKind::Create,
            path: path.as_str().to_string(),
            delta: fields,
        });
        state.notify(path.as_str());
        Ok(id)
    }

    async fn update(&self, path: &DocPath, delta: FieldDelta) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_writable(&delta)?;
        let stamp = self.stamp(&state);

        let doc = state
            .docs
            .get_mut(path.as_str())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let pending = apply_delta(&mut doc.fields, &delta, stamp.as_ref());

        state
            .unacked
            .extend(pending.into_iter().map(|f| (path.as_str().to_string(), f)));
        state.writes.push(WriteRecord {
            kind: WriteKind::Update,
            path: path.as_str().to_string(),
            delta,
        });
        state.notify(path.as_str());
        Ok(())
    }
}

// Returns the fields whose server timestamp is still pending.
fn apply_delta(
    fields: &mut Map<String, Value>,
    delta: &FieldDelta,
    stamp: Option<&Value>,
) -> Vec<String> {
    let mut pending = Vec::new();
    for (name, op) in delta.ops() {
        match op {
            FieldOp::Set(value) => {
                fields.insert(name.clone(), value.clone());
            }
            FieldOp::ArrayUnion(values) => {
                let entry = fields
                    .entry(name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
            FieldOp::ArrayRemove(values) => match fields.get_mut(name) {
                Some(Value::Array(items)) => items.retain(|item| !values.contains(item)),
                _ => {
                    fields.insert(name.clone(), Value::Array(Vec::new()));
                }
            },
            FieldOp::ServerTimestamp => match stamp {
                Some(stamp) => {
                    fields.insert(name.clone(), stamp.clone());
                }
                None => {
                    fields.insert(name.clone(), Value::Null);
                    pending.push(name.clone());
                }
            },
        }
    }
    pending
}

fn timestamp_value(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn order_key(fields: &Map<String, Value>, order_by: &str) -> Option<DateTime<Utc>> {
    fields
        .get(order_by)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn doc_id(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
