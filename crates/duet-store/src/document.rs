//! Document store contract.

use async_trait::async_trait;
use serde_json::{Map, Value};

use duet_shared::paths::{CollectionPath, DocPath};

use crate::listener::Listener;
use crate::Result;

/// Snapshot of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// A single field mutation. Array operations are applied atomically by the
/// store so concurrent writers never clobber each other's elements.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Add each element not already present.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of each element.
    ArrayRemove(Vec<Value>),
    /// Replaced by the store's clock when the write is acknowledged.
    ServerTimestamp,
}

/// Ordered set of field mutations applied in one write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDelta {
    ops: Vec<(String, FieldOp)>,
}

impl FieldDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::Set(value.into())));
        self
    }

    pub fn array_union(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops
            .push((field.to_string(), FieldOp::ArrayUnion(vec![value.into()])));
        self
    }

    pub fn array_remove(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops
            .push((field.to_string(), FieldOp::ArrayRemove(vec![value.into()])));
        self
    }

    pub fn server_timestamp(mut self, field: &str) -> Self {
        self.ops.push((field.to_string(), FieldOp::ServerTimestamp));
        self
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    pub fn get(&self, field: &str) -> Option<&FieldOp> {
        self.ops
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, op)| op)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for FieldDelta {
    type Item = (String, FieldOp);
    type IntoIter = std::vec::IntoIter<(String, FieldOp)>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Remote document store with live queries.
///
/// Subscriptions deliver the current snapshot first and then one snapshot
/// per change, in the order the store applied them. No ordering is
/// promised across different subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Watch a single document. `None` while it does not exist.
    fn subscribe_document(&self, path: &DocPath) -> Result<Listener<Option<Document>>>;

    /// Watch a collection ordered ascending by `order_by`.
    fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order_by: &str,
    ) -> Result<Listener<Vec<Document>>>;

    /// Create a document with a store-assigned id and return the id.
    async fn create(&self, collection: &CollectionPath, fields: FieldDelta) -> Result<String>;

    /// Apply `delta` to an existing document.
    async fn update(&self, path: &DocPath, delta: FieldDelta) -> Result<()>;
}
