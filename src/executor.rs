use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::merge::{merge_by_location_metrics, MergeFilters};
use crate::reader::{CollectionReader, DatasetQuery, EqualityFilters};
use crate::record::{FinanceRecord, Record};
use crate::schema::{CrossCollectionIntent, Dataset, Metric, QueryIntent, SortOrder, StatusFilter};
use crate::store::DocumentStore;
use crate::utils::{active_filter, apply_limit, contains_ignore_case, eq_ignore_case, sort_by_value};
use futures::future::try_join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which retrieval strategy produced an [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionPath {
    FirestoreIndexes,
    ClientSide,
    SportsCollection,
    EducationCollection,
    CrossCollectionMerge,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::FirestoreIndexes => "firestore-indexes",
            ExecutionPath::ClientSide => "client-side",
            ExecutionPath::SportsCollection => "sports-collection",
            ExecutionPath::EducationCollection => "education-collection",
            ExecutionPath::CrossCollectionMerge => "cross-collection-merge",
        }
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub records: Vec<Record>,
    /// Documents returned by the store. For finance and merge paths this is
    /// before in-memory filtering; for dataset paths it is after the
    /// store-side equality filter.
    pub docs_read: usize,
    /// True iff the retrieval used a server-side ordered query.
    pub used_indexes: bool,
    pub execution_path: ExecutionPath,
}

/// Entry point for running query intents against a document store.
///
/// The executor holds no state between calls: every `execute` reads the
/// store afresh and either returns a complete result or fails.
pub struct QueryExecutor<S> {
    reader: CollectionReader<S>,
}

impl<S: DocumentStore> QueryExecutor<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            reader: CollectionReader::new(store, config),
        }
    }

    pub fn reader(&self) -> &CollectionReader<S> {
        &self.reader
    }

    pub fn config(&self) -> &EngineConfig {
        self.reader.config()
    }

    /// True when a finance intent can be served by ordered index queries.
    /// Computed metrics have no stored value to order by, and an unsorted
    /// query gains nothing from an ordered index.
    pub fn indexed_path_eligible(intent: &QueryIntent) -> bool {
        intent.metric.dataset() == Dataset::Finance
            && intent.metric.is_indexable()
            && intent.sort.is_some()
    }

    pub async fn execute(&self, intent: &QueryIntent) -> Result<ExecutionResult> {
        intent.validate(self.config())?;

        let result = match intent.metric.dataset() {
            Dataset::Sports | Dataset::Education => self.execute_dataset(intent).await?,
            Dataset::Finance => match intent.sort {
                Some(order) if Self::indexed_path_eligible(intent) => {
                    self.execute_indexed(intent, order).await?
                }
                _ => self.run_client_side(intent).await?,
            },
        };

        info!(
            "Executed '{}' via {} ({} documents read, {} records returned)",
            intent.metric,
            result.execution_path,
            result.docs_read,
            result.records.len()
        );
        Ok(result)
    }

    /// One ordered query per target collection, then a merge that re-sorts
    /// and re-limits, since each collection's local top-k is not the global
    /// top-k.
    async fn execute_indexed(&self, intent: &QueryIntent, order: SortOrder) -> Result<ExecutionResult> {
        let collections = intent.target_collections();
        let metric = intent.metric;
        let location = active_filter(&intent.location_filter);
        let filters = EqualityFilters {
            status: intent.status,
            institution_type: active_filter(&intent.type_filter).map(str::to_string),
        };
        let has_equality =
            filters.status != StatusFilter::Any || filters.institution_type.is_some();
        // The location filter runs in memory, so the store must not cap rows first.
        let store_limit = if location.is_some() { None } else { intent.limit };

        let reader = &self.reader;
        let filters = &filters;
        let batches = try_join_all(collections.iter().map(|collection| async move {
            if has_equality {
                let records = reader
                    .fetch_indexed(collection, filters, metric, order, store_limit)
                    .await?;
                let read = records.len();
                Ok::<_, QueryError>((records, read))
            } else {
                let fetch = reader
                    .fetch_all_ranked(std::slice::from_ref(collection), metric)
                    .await?;
                let mut records = fetch.records;
                sort_finance(&mut records, metric, order);
                apply_limit(&mut records, store_limit);
                Ok((records, fetch.docs_read))
            }
        }))
        .await?;

        let docs_read: usize = batches.iter().map(|(_, read)| read).sum();
        let mut records: Vec<FinanceRecord> =
            batches.into_iter().flat_map(|(records, _)| records).collect();

        if let Some(location) = location {
            records.retain(|r| contains_ignore_case(r.header.location.as_deref(), location));
        }
        if collections.len() > 1 {
            debug!(
                "Re-sorting {} records merged from {} collections",
                records.len(),
                collections.len()
            );
            sort_finance(&mut records, metric, order);
        }
        apply_limit(&mut records, intent.limit);

        Ok(ExecutionResult {
            records: records.into_iter().map(Record::Finance).collect(),
            docs_read,
            used_indexes: true,
            execution_path: ExecutionPath::FirestoreIndexes,
        })
    }

    /// Runs a finance intent on the full-read path even when the indexed path
    /// is eligible. A sort on an indexed field ranks only records carrying
    /// that field, as the indexed path does, so both paths return the same
    /// ordered records.
    pub async fn execute_client_side(&self, intent: &QueryIntent) -> Result<ExecutionResult> {
        intent.validate(self.config())?;
        if intent.metric.dataset() != Dataset::Finance {
            return Err(QueryError::ValidationFailure(format!(
                "'{}' is not a finance metric",
                intent.metric
            )));
        }
        self.run_client_side(intent).await
    }

    /// Full collection reads, then status, type, location, sort and limit in
    /// that order.
    async fn run_client_side(&self, intent: &QueryIntent) -> Result<ExecutionResult> {
        let collections = intent.target_collections();
        let (mut records, docs_read) = if intent.sort.is_some() && intent.metric.is_indexable() {
            let fetch = self.reader.fetch_all_ranked(&collections, intent.metric).await?;
            (fetch.records, fetch.docs_read)
        } else {
            let records = self.reader.fetch_all(&collections).await?;
            let read = records.len();
            (records, read)
        };

        records.retain(|r| intent.status.matches(r.header.status));
        if let Some(kind) = active_filter(&intent.type_filter) {
            records.retain(|r| eq_ignore_case(r.header.institution_type.as_deref(), kind));
        }
        if let Some(location) = active_filter(&intent.location_filter) {
            records.retain(|r| contains_ignore_case(r.header.location.as_deref(), location));
        }
        if let Some(order) = intent.sort {
            sort_finance(&mut records, intent.metric, order);
        }
        apply_limit(&mut records, intent.limit);

        Ok(ExecutionResult {
            records: records.into_iter().map(Record::Finance).collect(),
            docs_read,
            used_indexes: false,
            execution_path: ExecutionPath::ClientSide,
        })
    }

    /// Sports and education each live in one collection, so
    /// `intent.collections` plays no part here.
    async fn execute_dataset(&self, intent: &QueryIntent) -> Result<ExecutionResult> {
        let options = DatasetQuery {
            filters: EqualityFilters {
                status: intent.status,
                institution_type: active_filter(&intent.type_filter).map(str::to_string),
            },
            order_field: intent.sort.map(|_| intent.metric),
            order_dir: intent.sort,
            limit: intent.limit,
            location: intent.location_filter.clone(),
        };

        let dataset = intent.metric.dataset();
        debug!(
            "Routing '{}' to collection '{}'",
            intent.metric,
            self.config().owning_collection(dataset).unwrap_or_default()
        );

        let (records, docs_read, execution_path) = match dataset {
            Dataset::Sports => {
                let fetch = self.reader.fetch_sports(&options).await?;
                let records = fetch.records.into_iter().map(Record::Sports).collect();
                (records, fetch.docs_read, ExecutionPath::SportsCollection)
            }
            Dataset::Education => {
                let fetch = self.reader.fetch_education(&options).await?;
                let records = fetch.records.into_iter().map(Record::Education).collect();
                (records, fetch.docs_read, ExecutionPath::EducationCollection)
            }
            Dataset::Finance => {
                return Err(QueryError::ValidationFailure(format!(
                    "'{}' is a finance metric",
                    intent.metric
                )))
            }
        };

        Ok(ExecutionResult {
            records,
            docs_read,
            used_indexes: intent.sort.is_some(),
            execution_path,
        })
    }

    /// Answers a multi-dataset question by joining rows on location.
    pub async fn execute_cross(&self, intent: &CrossCollectionIntent) -> Result<ExecutionResult> {
        intent.validate(self.config())?;

        let filters = MergeFilters {
            location: intent.location_filter.clone(),
            status: intent.status,
            institution_type: intent.type_filter.clone(),
        };
        let outcome = merge_by_location_metrics(&self.reader, &intent.metrics, &filters).await?;

        let mut rows = outcome.rows;
        let sort_metric = intent.sort_metric.or_else(|| intent.metrics.first().copied());
        if let (Some(order), Some(metric)) = (intent.sort, sort_metric) {
            sort_by_value(&mut rows, order, |row| row.metric(metric));
        }
        apply_limit(&mut rows, intent.limit);

        let datasets: Vec<&str> = intent.datasets().iter().map(|d| d.as_str()).collect();
        info!(
            "Executed cross-collection merge over {} ({} documents read, {} rows returned)",
            datasets.join(", "),
            outcome.docs_read,
            rows.len()
        );

        Ok(ExecutionResult {
            records: rows.into_iter().map(Record::Merged).collect(),
            docs_read: outcome.docs_read,
            used_indexes: false,
            execution_path: ExecutionPath::CrossCollectionMerge,
        })
    }
}

fn sort_finance(records: &mut [FinanceRecord], metric: Metric, order: SortOrder) {
    sort_by_value(records, order, |r| r.metric(metric).unwrap_or(0.0));
}

/// Plain-text account of which path ran and why. Deterministic, unlike the
/// generated summary.
pub fn describe_execution(intent: &QueryIntent, result: &ExecutionResult) -> String {
    let dataset = intent.metric.dataset();
    let mut parts = Vec::new();

    let reason = match result.execution_path {
        ExecutionPath::FirestoreIndexes => format!(
            "'{}' is an indexed field and a {} sort was requested, so each collection was queried with an ordered index; records without '{}' are not ranked",
            intent.metric,
            intent.sort.map_or("", |s| s.as_str()),
            intent.metric
        ),
        ExecutionPath::ClientSide if intent.metric.is_derived() => format!(
            "'{}' is computed from other fields and cannot be ordered by an index, so full collections were filtered and sorted in memory",
            intent.metric
        ),
        ExecutionPath::ClientSide if !intent.metric.is_indexable() => format!(
            "'{}' has no index, so full collections were filtered and sorted in memory",
            intent.metric
        ),
        ExecutionPath::ClientSide => match intent.sort {
            Some(order) => format!(
                "a {} sort on '{}' was run over full collections in memory; records without '{}' are not ranked",
                order.as_str(),
                intent.metric,
                intent.metric
            ),
            None => "no sort was requested, so full collections were filtered in memory".to_string(),
        },
        ExecutionPath::SportsCollection | ExecutionPath::EducationCollection => format!(
            "'{}' belongs to the {} dataset, which lives in a single collection{}",
            intent.metric,
            dataset,
            if result.used_indexes {
                " queried with an ordered index"
            } else {
                ""
            }
        ),
        ExecutionPath::CrossCollectionMerge => {
            "rows from several datasets were joined on location".to_string()
        }
    };
    parts.push(format!("Path {}: {}.", result.execution_path, reason));

    if dataset == Dataset::Finance {
        parts.push(format!(
            "Collections: {}.",
            intent.target_collections().join(", ")
        ));
    }

    let mut filters = Vec::new();
    if intent.status != StatusFilter::Any {
        filters.push(format!("status={}", intent.status.as_str()));
    }
    if let Some(kind) = active_filter(&intent.type_filter) {
        filters.push(format!("type={}", kind));
    }
    if let Some(location) = active_filter(&intent.location_filter) {
        filters.push(format!("location contains '{}'", location));
    }
    if !filters.is_empty() {
        parts.push(format!("Filters: {}.", filters.join(", ")));
    }
    if let Some(limit) = intent.limit {
        parts.push(format!("Limit: {}.", limit));
    }

    parts.push(format!(
        "Read {} documents, returned {} records.",
        result.docs_read,
        result.records.len()
    ));

    parts.join(" ")
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

    fn executor() -> QueryExecutor<InMemoryStore> {
        let store = InMemoryStore::new()
            .with_documents(
                "A",
                vec![
                    json!({"code": "a1", "status": "active", "type": "school", "location": "Pune", "income": 50, "rent": 5}),
                    json!({"code": "a2", "status": "inactive", "type": "college", "location": "Goa", "income": 80, "rent": 70}),
                    json!({"code": "a3", "status": "active", "type": "college", "location": "Pune", "income": 20, "rent": 1}),
                ],
            )
            .with_documents(
                "B",
                vec![json!({"code": "b1", "status": "active", "type": "school", "location": "Delhi", "income": 60, "rent": 2})],
            )
            .with_documents(
                "education",
                vec![
                    json!({"code": "e1", "status": "active", "location": "Pune", "students": 900}),
                    json!({"code": "e2", "status": "active", "location": "Goa", "students": 400}),
                ],
            );
        QueryExecutor::new(store, config())
    }

    fn codes(result: &ExecutionResult) -> Vec<&str> {
        result.records.iter().map(|r| r.code()).collect()
    }

    #[test]
    fn test_path_eligibility() {
        let sorted = QueryIntent::new(Metric::Income).with_sort(SortOrder::Desc);
        assert!(QueryExecutor::<InMemoryStore>::indexed_path_eligible(&sorted));

        let unsorted = QueryIntent::new(Metric::Income);
        assert!(!QueryExecutor::<InMemoryStore>::indexed_path_eligible(&unsorted));

        for metric in [Metric::Profit, Metric::Expenditure, Metric::Staff] {
            let intent = QueryIntent::new(metric).with_sort(SortOrder::Desc);
            assert!(!QueryExecutor::<InMemoryStore>::indexed_path_eligible(&intent));
        }
    }

    #[tokio::test]
    async fn test_validation_runs_before_any_read() {
        let executor = executor();
        let intent = QueryIntent::new(Metric::Income)
            .with_collections(["A"])
            .with_limit(500);
        let err = executor.execute(&intent).await.unwrap_err();
        assert!(matches!(err, QueryError::ValidationFailure(_)));
        assert_eq!(executor.reader().store().read_count("A"), 0);
    }

    #[tokio::test]
    async fn test_client_side_filters_in_order() {
        let intent = QueryIntent::new(Metric::Profit)
            .with_collections(["A", "B"])
            .with_status(StatusFilter::Active)
            .with_type("SCHOOL")
            .with_sort(SortOrder::Asc);
        let result = executor().execute(&intent).await.unwrap();

        assert_eq!(result.execution_path, ExecutionPath::ClientSide);
        assert!(!result.used_indexes);
        assert_eq!(result.docs_read, 4);
        assert_eq!(codes(&result), vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn test_indexed_path_with_location_filter_limits_after_filtering() {
        let intent = QueryIntent::new(Metric::Income)
            .with_collections(["A", "B"])
            .with_status(StatusFilter::Active)
            .with_location("pune")
            .with_sort(SortOrder::Desc)
            .with_limit(1);
        let result = executor().execute(&intent).await.unwrap();

        assert_eq!(result.execution_path, ExecutionPath::FirestoreIndexes);
        assert_eq!(codes(&result), vec!["a1"]);
    }

    #[tokio::test]
    async fn test_indexed_path_without_filters_sorts_in_memory() {
        let intent = QueryIntent::new(Metric::Rent)
            .with_collections(["A", "B"])
            .with_sort(SortOrder::Desc)
            .with_limit(2);
        let result = executor().execute(&intent).await.unwrap();

        assert!(result.used_indexes);
        assert_eq!(result.docs_read, 4);
        assert_eq!(codes(&result), vec!["a2", "a1"]);
    }

    #[tokio::test]
    async fn test_education_ignores_collections() {
        let intent = QueryIntent::new(Metric::Students)
            .with_collections(["A"])
            .with_sort(SortOrder::Desc);
        let result = executor().execute(&intent).await.unwrap();

        assert_eq!(result.execution_path, ExecutionPath::EducationCollection);
        assert!(result.used_indexes);
        assert_eq!(codes(&result), vec!["e1", "e2"]);
        assert!(result.records.iter().all(|r| r.collection() == "education"));
    }

    #[tokio::test]
    async fn test_cross_collection_merge() {
        let mut intent = CrossCollectionIntent::new([Metric::Income, Metric::Students]);
        intent.sort_metric = Some(Metric::Income);
        intent.sort = Some(SortOrder::Desc);
        let executor = executor();
        let result = executor.execute_cross(&intent).await.unwrap();

        assert_eq!(result.execution_path, ExecutionPath::CrossCollectionMerge);
        assert!(!result.used_indexes);
        assert_eq!(result.docs_read, 6);
        assert_eq!(codes(&result), vec!["Goa", "Pune", "Delhi"]);
        assert_eq!(result.records[1].metric_value(Metric::Income), 70.0);
        assert_eq!(result.records[1].metric_value(Metric::Students), 900.0);
        assert_eq!(executor.reader().store().read_count("sports"), 0);
    }

    #[tokio::test]
    async fn test_describe_execution_mentions_reason() {
        let intent = QueryIntent::new(Metric::Profit)
            .with_collections(["A"])
            .with_status(StatusFilter::Active);
        let result = executor().execute(&intent).await.unwrap();
        let text = describe_execution(&intent, &result);

        assert!(text.starts_with("Path client-side:"));
        assert!(text.contains("computed"));
        assert!(text.contains("status=active"));
        assert!(text.contains("Read 3 documents, returned 2 records."));
        assert_eq!(text, describe_execution(&intent, &result));
    }

    #[tokio::test]
    async fn test_describe_forced_client_side_sort() {
        let intent = QueryIntent::new(Metric::Income)
            .with_collections(["A"])
            .with_sort(SortOrder::Desc);
        let result = executor().execute_client_side(&intent).await.unwrap();
        let text = describe_execution(&intent, &result);

        assert!(text.starts_with("Path client-side: a desc sort on 'income'"));
        assert!(!text.contains("no sort was requested"));

        let unsorted = QueryIntent::new(Metric::Income).with_collections(["A"]);
        let result = executor().execute(&unsorted).await.unwrap();
        assert!(describe_execution(&unsorted, &result).contains("no sort was requested"));
    }
}
