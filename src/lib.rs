//! # Institution Query Engine
//!
//! Executes structured query intents over institution collections held in a
//! document store: finance records split across several named collections,
//! and single sports and education collections.
//!
//! ## Core Concepts
//!
//! - **Query Intent**: metric, target collections, status/type/location filters, sort, limit, breakdown
//! - **Indexed path**: one ordered server-side query per finance collection, merged and re-limited
//! - **Client-side path**: full collection reads filtered and sorted in memory
//! - **Computed fields**: `expenditure` and `profit` are derived on read and never stored
//! - **Location merge**: finance, sports and education rows joined on `location`
//!
//! ## Example
//!
//! ```rust,ignore
//! use institution_query_engine::*;
//! use serde_json::json;
//!
//! let store = InMemoryStore::new().with_documents(
//!     "schools",
//!     vec![
//!         json!({"code": "1", "status": "active", "income": 100, "rent": 10, "salary": 30}),
//!         json!({"code": "2", "status": "active", "income": 50, "rent": 20}),
//!     ],
//! );
//! let executor = QueryExecutor::new(store, EngineConfig::default());
//!
//! let intent = QueryIntent::new(Metric::Profit)
//!     .with_collections(["schools"])
//!     .with_status(StatusFilter::Active);
//! let result = executor.execute(&intent).await?;
//! let totals = aggregate(&result.records, &intent);
//!
//! assert_eq!(totals.total, 90.0);
//! assert_eq!(result.execution_path, ExecutionPath::ClientSide);
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod merge;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod schema;
pub mod store;
pub mod utils;

#[cfg(feature = "gemini")]
pub mod llm;

pub use aggregator::{aggregate, AggregateResult, BreakdownEntry};
pub use config::EngineConfig;
pub use error::{QueryError, Result};
pub use executor::{describe_execution, ExecutionPath, ExecutionResult, QueryExecutor};
pub use merge::{merge_by_location, merge_by_location_metrics, MergeFilters, MergeOutcome};
pub use pipeline::{Answer, CrossAnswer, IntentParser, QueryAssistant, ResponseSummarizer};
pub use reader::{CollectionReader, DatasetFetch, DatasetQuery, EqualityFilters};
pub use record::*;
pub use schema::*;
pub use store::memory::InMemoryStore;
pub use store::{Document, DocumentStore, StoreQuery};

#[cfg(feature = "firestore")]
pub use store::firestore::FirestoreStore;
