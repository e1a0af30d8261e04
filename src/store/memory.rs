use crate::error::{QueryError, Result};
use crate::store::{Direction, Document, DocumentStore, StoreQuery};
use crate::utils::coerce_number;
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CompositeIndex {
    equality_fields: BTreeSet<String>,
    order_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexPolicy {
    /// Every equality + order combination is served.
    Permissive,
    /// Only combinations registered with `with_index` are served.
    Declared,
}

/// In-process document store with the same query model as the hosted one:
/// exact-value equality terms, a single order-by, and a row cap.
///
/// Ordered queries skip documents that lack the order field, and ties keep
/// insertion order. Every composite query is served until
/// [`InMemoryStore::require_declared_indexes`] is called.
pub struct InMemoryStore {
    collections: HashMap<String, Vec<Document>>,
    indexes: HashMap<String, Vec<CompositeIndex>>,
    policy: IndexPolicy,
    failing: HashSet<String>,
    reads: Mutex<HashMap<String, usize>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: HashMap::new(),
            indexes: HashMap::new(),
            policy: IndexPolicy::Permissive,
            failing: HashSet::new(),
            reads: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&mut self, collection: &str, document: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Inserts JSON objects with ids `"{collection}-{n}"`.
    pub fn with_documents<I>(mut self, collection: &str, documents: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        for value in documents {
            let n = self.collections.get(collection).map_or(0, Vec::len);
            self.insert(collection, Document::from_json(format!("{}-{}", collection, n), value));
        }
        self
    }

    /// Switch to declared-index mode: composite queries succeed only for
    /// combinations registered through [`InMemoryStore::with_index`].
    pub fn require_declared_indexes(mut self) -> Self {
        self.policy = IndexPolicy::Declared;
        self
    }

    pub fn with_index(mut self, collection: &str, equality_fields: &[&str], order_field: &str) -> Self {
        self.indexes
            .entry(collection.to_string())
            .or_default()
            .push(CompositeIndex {
                equality_fields: equality_fields.iter().map(|f| f.to_string()).collect(),
                order_field: order_field.to_string(),
            });
        self
    }

    /// Every read of `collection` fails with a network error.
    pub fn fail_collection(mut self, collection: &str) -> Self {
        self.failing.insert(collection.to_string());
        self
    }

    /// Number of reads (of either kind) issued against `collection`.
    pub fn read_count(&self, collection: &str) -> usize {
        self.reads
            .lock()
            .map(|reads| reads.get(collection).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_read(&self, collection: &str) -> Result<()> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads.entry(collection.to_string()).or_insert(0) += 1;
        }
        if self.failing.contains(collection) {
            return Err(QueryError::NetworkFailure(format!(
                "Collection '{}' is unreachable",
                collection
            )));
        }
        Ok(())
    }

    fn check_index(&self, collection: &str, query: &StoreQuery) -> Result<()> {
        if self.policy == IndexPolicy::Permissive || !query.needs_composite_index() {
            return Ok(());
        }
        let Some(order) = &query.order else {
            return Ok(());
        };

        let wanted: BTreeSet<String> = query.equality.iter().map(|t| t.field.clone()).collect();
        let found = self.indexes.get(collection).is_some_and(|indexes| {
            indexes
                .iter()
                .any(|idx| idx.equality_fields == wanted && idx.order_field == order.field)
        });

        if found {
            Ok(())
        } else {
            Err(QueryError::IndexUnavailable {
                collection: collection.to_string(),
                details: format!(
                    "equality on [{}] ordered by '{}'",
                    wanted.into_iter().collect::<Vec<_>>().join(", "),
                    order.field
                ),
            })
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.record_read(collection)?;
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    async fn get_by_query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Document>> {
        self.record_read(collection)?;
        self.check_index(collection, query)?;

        let mut matched: Vec<Document> = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| {
                        query
                            .equality
                            .iter()
                            .all(|term| doc.get(&term.field) == Some(&term.value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            matched.retain(|doc| doc.has_value(&order.field));
            matched.sort_by(|a, b| {
                let left = coerce_number(a.get(&order.field));
                let right = coerce_number(b.get(&order.field));
                let ordering = left.partial_cmp(&right).unwrap_or(Ordering::Equal);
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit as usize);
        }

        debug!(
            "In-memory query on '{}' matched {} documents",
            collection,
            matched.len()
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::new().with_documents(
            "A",
            vec![
                json!({"status": "active", "type": "school", "income": 10}),
                json!({"status": "inactive", "type": "school", "income": 30}),
                json!({"status": "active", "type": "college", "income": 20}),
                json!({"status": "active", "type": "school"}),
            ],
        )
    }

    #[tokio::test]
    async fn test_get_all_preserves_insertion_order() {
        let docs = store().get_all("A").await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A-0", "A-1", "A-2", "A-3"]);
        assert!(store().get_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let query = StoreQuery::new()
            .filter("status", "active")
            .order_by("income", Direction::Descending)
            .limit(Some(5));
        let docs = store().get_by_query("A", &query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        // A-3 has no income field and is skipped by the ordered query.
        assert_eq!(ids, vec!["A-2", "A-0"]);
    }

    #[tokio::test]
    async fn test_default_policy_serves_composite_queries() {
        let composite = StoreQuery::new()
            .filter("type", "school")
            .order_by("income", Direction::Descending);
        let docs = store().get_by_query("A", &composite).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A-1", "A-0"]);

        let declared = store().require_declared_indexes();
        let err = declared.get_by_query("A", &composite).await.unwrap_err();
        assert!(matches!(err, QueryError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_declared_indexes() {
        let store = store()
            .require_declared_indexes()
            .with_index("A", &["status"], "income");

        let indexed = StoreQuery::new()
            .filter("status", "active")
            .order_by("income", Direction::Ascending);
        assert!(store.get_by_query("A", &indexed).await.is_ok());

        let missing = StoreQuery::new()
            .filter("type", "school")
            .order_by("income", Direction::Ascending);
        let err = store.get_by_query("A", &missing).await.unwrap_err();
        assert!(matches!(err, QueryError::IndexUnavailable { .. }));

        // Single-field queries never need a composite index.
        let order_only = StoreQuery::new().order_by("income", Direction::Ascending);
        assert!(store.get_by_query("A", &order_only).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_collection_and_read_counts() {
        let store = store().fail_collection("A");
        assert!(matches!(
            store.get_all("A").await,
            Err(QueryError::NetworkFailure(_))
        ));
        assert_eq!(store.read_count("A"), 1);
        assert_eq!(store.read_count("B"), 0);
    }
}
