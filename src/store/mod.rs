//! Document store capability consumed by the reader.
//!
//! A store exposes two reads per named collection: everything, or an
//! equality + order + limit query served by a composite index. Backings:
//!
//! - [`memory::InMemoryStore`]: reference backing with declared indexes
//! - `firestore::FirestoreStore`: Firestore REST API (feature `firestore`)

pub mod memory;

#[cfg(feature = "firestore")]
pub mod firestore;

use crate::error::Result;
use crate::schema::SortOrder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A schemaless document: store-assigned id plus an opaque field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Builds a document from a JSON object; non-object values yield no fields.
    pub fn from_json(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// True when `field` is present and not null. Ordered queries only
    /// return documents for which this holds.
    pub fn has_value(&self, field: &str) -> bool {
        !matches!(self.get(field), None | Some(Value::Null))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl From<SortOrder> for Direction {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Asc => Direction::Ascending,
            SortOrder::Desc => Direction::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualityTerm {
    pub field: String,
    pub value: Value,
}

impl EqualityTerm {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTerm {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub equality: Vec<EqualityTerm>,
    pub order: Option<OrderTerm>,
    pub limit: Option<u32>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equality.push(EqualityTerm::new(field, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderTerm {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    /// Equality terms combined with an order term need a composite index.
    pub fn needs_composite_index(&self) -> bool {
        !self.equality.is_empty() && self.order.is_some()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Fails with `QueryError::IndexUnavailable` when the equality + order
    /// combination has no backing index.
    async fn get_by_query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Document>>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>> {
        (**self).get_all(collection).await
    }

    async fn get_by_query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Document>> {
        (**self).get_by_query(collection, query).await
    }
}
