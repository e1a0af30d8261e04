use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::record::{EducationRecord, FinanceRecord, SportsRecord};
use crate::schema::{Dataset, Metric, SortOrder, StatusFilter};
use crate::store::{Document, DocumentStore, StoreQuery};
use crate::utils::{active_filter, apply_limit, contains_ignore_case};
use futures::future::try_join_all;
use log::debug;

/// Equality terms the indexed finance path can push to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EqualityFilters {
    pub status: StatusFilter,
    pub institution_type: Option<String>,
}

impl EqualityFilters {
    fn apply_to(&self, mut query: StoreQuery) -> StoreQuery {
        if let Some(status) = self.status.equality_value() {
            query = query.filter("status", status);
        }
        if let Some(kind) = active_filter(&self.institution_type) {
            query = query.filter("type", kind);
        }
        query
    }
}

/// Options for the single-collection sports and education reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetQuery {
    pub filters: EqualityFilters,
    pub order_field: Option<Metric>,
    pub order_dir: Option<SortOrder>,
    pub limit: Option<u32>,
    /// Case-insensitive substring, applied after the store read.
    pub location: Option<String>,
}

/// Records read from a dataset collection plus the number of documents the
/// store returned for them.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFetch<T> {
    pub records: Vec<T>,
    pub docs_read: usize,
}

pub struct CollectionReader<S> {
    store: S,
    config: EngineConfig,
}

impl<S: DocumentStore> CollectionReader<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reads every document of each named finance collection. Names are
    /// de-duplicated, the reads run concurrently, and results are concatenated
    /// in the order the names were given.
    pub async fn fetch_all(&self, collections: &[String]) -> Result<Vec<FinanceRecord>> {
        let batches = self.read_collections(collections).await?;
        Ok(batches
            .into_iter()
            .flat_map(|(name, docs)| {
                docs.into_iter()
                    .map(move |doc| FinanceRecord::from_document(&doc, name))
            })
            .collect())
    }

    /// Full reads that keep only documents carrying `field`, the same rows an
    /// ordered query on `field` would return. `docs_read` counts every
    /// document the store returned.
    pub async fn fetch_all_ranked(
        &self,
        collections: &[String],
        field: Metric,
    ) -> Result<DatasetFetch<FinanceRecord>> {
        let batches = self.read_collections(collections).await?;
        let docs_read: usize = batches.iter().map(|(_, docs)| docs.len()).sum();

        let records: Vec<FinanceRecord> = batches
            .into_iter()
            .flat_map(|(name, docs)| {
                docs.into_iter()
                    .filter(move |doc| doc.has_value(field.field_name()))
                    .map(move |doc| FinanceRecord::from_document(&doc, name))
            })
            .collect();
        if records.len() < docs_read {
            debug!(
                "Skipped {} documents without '{}'",
                docs_read - records.len(),
                field
            );
        }

        Ok(DatasetFetch { records, docs_read })
    }

    async fn read_collections<'a>(
        &self,
        collections: &'a [String],
    ) -> Result<Vec<(&'a str, Vec<Document>)>> {
        let mut unique: Vec<&str> = Vec::with_capacity(collections.len());
        for name in collections {
            if !unique.contains(&name.as_str()) {
                unique.push(name);
            }
        }

        try_join_all(unique.into_iter().map(|name| async move {
            let docs = self.store.get_all(name).await?;
            debug!("Fetched {} documents from '{}'", docs.len(), name);
            Ok::<_, QueryError>((name, docs))
        }))
        .await
    }

    /// One ordered server-side query against a finance collection.
    pub async fn fetch_indexed(
        &self,
        collection: &str,
        filters: &EqualityFilters,
        sort_field: Metric,
        order: SortOrder,
        limit: Option<u32>,
    ) -> Result<Vec<FinanceRecord>> {
        if sort_field.dataset() != Dataset::Finance || !sort_field.is_indexable() {
            return Err(QueryError::ValidationFailure(format!(
                "'{}' is not an indexed finance field",
                sort_field
            )));
        }

        let query = filters
            .apply_to(StoreQuery::new())
            .order_by(sort_field.field_name(), order.into())
            .limit(limit);

        let docs = self.store.get_by_query(collection, &query).await?;
        debug!(
            "Indexed query on '{}' ({} equality terms, order by {} {}) returned {} documents",
            collection,
            query.equality.len(),
            sort_field,
            order.as_str(),
            docs.len()
        );

        Ok(docs
            .iter()
            .map(|doc| FinanceRecord::from_document(doc, collection))
            .collect())
    }

    pub async fn fetch_sports(&self, options: &DatasetQuery) -> Result<DatasetFetch<SportsRecord>> {
        let collection = self.config.sports_collection.clone();
        self.fetch_dataset(&collection, options, SportsRecord::from_document, |r| {
            r.header.location.as_deref()
        })
        .await
    }

    pub async fn fetch_education(
        &self,
        options: &DatasetQuery,
    ) -> Result<DatasetFetch<EducationRecord>> {
        let collection = self.config.education_collection.clone();
        self.fetch_dataset(&collection, options, EducationRecord::from_document, |r| {
            r.header.location.as_deref()
        })
        .await
    }

    async fn fetch_dataset<T, N, L>(
        &self,
        collection: &str,
        options: &DatasetQuery,
        normalize: N,
        location_of: L,
    ) -> Result<DatasetFetch<T>>
    where
        N: Fn(&Document, &str) -> T,
        L: Fn(&T) -> Option<&str>,
    {
        let location = active_filter(&options.location);

        let mut query = options.filters.apply_to(StoreQuery::new());
        if let Some(field) = options.order_field {
            let direction = options.order_dir.unwrap_or(SortOrder::Asc);
            query = query.order_by(field.field_name(), direction.into());
        }
        // The location filter runs in memory, so the row cap has to wait for it.
        if location.is_none() {
            query = query.limit(options.limit);
        }

        let docs = if query == StoreQuery::new() {
            self.store.get_all(collection).await?
        } else {
            self.store.get_by_query(collection, &query).await?
        };
        let docs_read = docs.len();
        debug!("Fetched {} documents from '{}'", docs_read, collection);

        let mut records: Vec<T> = docs.iter().map(|doc| normalize(doc, collection)).collect();
        if let Some(location) = location {
            records.retain(|record| contains_ignore_case(location_of(record), location));
            apply_limit(&mut records, options.limit);
        }

        Ok(DatasetFetch { records, docs_read })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn config() -> EngineConfig {
        EngineConfig {
            finance_collections: vec!["A".to_string(), "B".to_string()],
            ..EngineConfig::default()
        }
    }

    fn reader() -> CollectionReader<InMemoryStore> {
        let store = InMemoryStore::new()
            .with_documents(
                "A",
                vec![
                    json!({"code": "a1", "status": "active", "income": 5}),
                    json!({"code": "a2", "status": "inactive", "income": 9}),
                ],
            )
            .with_documents("B", vec![json!({"code": "b1", "status": "active", "income": 7})])
            .with_documents(
                "sports",
                vec![
                    json!({"code": "s1", "location": "Pune", "medals": 3, "status": "active"}),
                    json!({"code": "s2", "location": "Mumbai", "medals": 8, "status": "active"}),
                    json!({"code": "s3", "location": "pune east", "medals": 5, "status": "inactive"}),
                ],
            );
        CollectionReader::new(store, config())
    }

    #[tokio::test]
    async fn test_fetch_all_deduplicates_and_keeps_order() {
        let reader = reader();
        let names = vec!["B".to_string(), "A".to_string(), "B".to_string()];
        let records = reader.fetch_all(&names).await.unwrap();

        let codes: Vec<&str> = records.iter().map(|r| r.header.code.as_str()).collect();
        assert_eq!(codes, vec!["b1", "a1", "a2"]);
        assert_eq!(records[0].header.collection, "B");
        assert_eq!(reader.store().read_count("B"), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_ranked_skips_missing_field() {
        let store = InMemoryStore::new().with_documents(
            "A",
            vec![
                json!({"code": "x", "income": 5}),
                json!({"code": "y"}),
                json!({"code": "z", "income": null}),
            ],
        );
        let reader = CollectionReader::new(store, config());
        let fetch = reader
            .fetch_all_ranked(&["A".to_string()], Metric::Income)
            .await
            .unwrap();

        assert_eq!(fetch.docs_read, 3);
        let codes: Vec<&str> = fetch.records.iter().map(|r| r.header.code.as_str()).collect();
        assert_eq!(codes, vec!["x"]);
    }

    #[tokio::test]
    async fn test_fetch_all_fails_whole_read() {
        let store = InMemoryStore::new()
            .with_documents("A", vec![json!({"income": 1})])
            .fail_collection("B");
        let reader = CollectionReader::new(store, config());
        let err = reader
            .fetch_all(&["A".to_string(), "B".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_fetch_indexed_rejects_computed_fields() {
        let err = reader()
            .fetch_indexed("A", &EqualityFilters::default(), Metric::Profit, SortOrder::Desc, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn test_fetch_indexed_surfaces_missing_index() {
        let store = InMemoryStore::new()
            .with_documents("A", vec![json!({"status": "active", "income": 1})])
            .require_declared_indexes();
        let reader = CollectionReader::new(store, config());
        let filters = EqualityFilters {
            status: StatusFilter::Active,
            institution_type: None,
        };
        let err = reader
            .fetch_indexed("A", &filters, Metric::Income, SortOrder::Desc, None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_sports_location_filter_before_limit() {
        let options = DatasetQuery {
            order_field: Some(Metric::Medals),
            order_dir: Some(SortOrder::Desc),
            limit: Some(1),
            location: Some("PUNE".to_string()),
            ..DatasetQuery::default()
        };
        let fetch = reader().fetch_sports(&options).await.unwrap();
        assert_eq!(fetch.docs_read, 3);
        assert_eq!(fetch.records.len(), 1);
        assert_eq!(fetch.records[0].header.code, "s3");
    }

    #[tokio::test]
    async fn test_fetch_sports_status_equality() {
        let options = DatasetQuery {
            filters: EqualityFilters {
                status: StatusFilter::Active,
                institution_type: None,
            },
            ..DatasetQuery::default()
        };
        let fetch = reader().fetch_sports(&options).await.unwrap();
        assert_eq!(fetch.docs_read, 2);
        assert_eq!(fetch.records[0].header.collection, "sports");
    }
}
