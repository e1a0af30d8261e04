//! Question in, answer out.
//!
//! [`QueryAssistant`] chains an [`IntentParser`], the [`QueryExecutor`] and an
//! optional [`ResponseSummarizer`]. A parse failure ends the request; a failed
//! summary only leaves `summary` empty, since the data result is still correct.

use crate::aggregator::{aggregate, AggregateResult};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::executor::{ExecutionResult, QueryExecutor};
use crate::schema::{CrossCollectionIntent, QueryIntent};
use crate::store::DocumentStore;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Turns free text into a structured intent.
#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse_intent(&self, text: &str) -> Result<QueryIntent>;

    async fn parse_cross_intent(&self, text: &str) -> Result<CrossCollectionIntent>;
}

/// Turns an execution result into a sentence for the person who asked.
#[async_trait]
pub trait ResponseSummarizer: Send + Sync {
    async fn summarize(
        &self,
        question: &str,
        intent: &QueryIntent,
        result: &ExecutionResult,
    ) -> Result<String>;

    async fn summarize_cross(
        &self,
        question: &str,
        intent: &CrossCollectionIntent,
        result: &ExecutionResult,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub intent: QueryIntent,
    pub result: ExecutionResult,
    pub aggregate: AggregateResult,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossAnswer {
    pub intent: CrossCollectionIntent,
    pub result: ExecutionResult,
    pub summary: Option<String>,
}

pub struct QueryAssistant<S, P> {
    executor: QueryExecutor<S>,
    parser: P,
    summarizer: Option<Box<dyn ResponseSummarizer>>,
}

impl<S: DocumentStore, P: IntentParser> QueryAssistant<S, P> {
    pub fn new(store: S, config: EngineConfig, parser: P) -> Self {
        Self {
            executor: QueryExecutor::new(store, config),
            parser,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: impl ResponseSummarizer + 'static) -> Self {
        self.summarizer = Some(Box::new(summarizer));
        self
    }

    pub fn executor(&self) -> &QueryExecutor<S> {
        &self.executor
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let intent = self.parser.parse_intent(question).await?;
        info!("Parsed question into intent for metric '{}'", intent.metric);

        let result = self.executor.execute(&intent).await?;
        let aggregate = aggregate(&result.records, &intent);

        let summary = match &self.summarizer {
            Some(summarizer) => match summarizer.summarize(question, &intent, &result).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Summary generation failed, returning data only: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Answer {
            intent,
            result,
            aggregate,
            summary,
        })
    }

    pub async fn answer_cross(&self, question: &str) -> Result<CrossAnswer> {
        let intent = self.parser.parse_cross_intent(question).await?;
        info!(
            "Parsed question into cross-collection intent over {} metrics",
            intent.metrics.len()
        );

        let result = self.executor.execute_cross(&intent).await?;

        let summary = match &self.summarizer {
            Some(summarizer) => {
                match summarizer.summarize_cross(question, &intent, &result).await {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!("Summary generation failed, returning data only: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(CrossAnswer {
            intent,
            result,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::schema::{Metric, SortOrder};
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    struct FixedParser {
        intent: Option<QueryIntent>,
    }

    #[async_trait]
    impl IntentParser for FixedParser {
        async fn parse_intent(&self, text: &str) -> Result<QueryIntent> {
            self.intent
                .clone()
                .ok_or_else(|| QueryError::ParseFailure(format!("cannot read '{}'", text)))
        }

        async fn parse_cross_intent(&self, _text: &str) -> Result<CrossCollectionIntent> {
            let mut intent = CrossCollectionIntent::new([Metric::Income]);
            intent.sort = Some(SortOrder::Desc);
            Ok(intent)
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl ResponseSummarizer for EchoSummarizer {
        async fn summarize(
            &self,
            _question: &str,
            intent: &QueryIntent,
            result: &ExecutionResult,
        ) -> Result<String> {
            Ok(format!("{} records for {}", result.records.len(), intent.metric))
        }

        async fn summarize_cross(
            &self,
            _question: &str,
            _intent: &CrossCollectionIntent,
            result: &ExecutionResult,
        ) -> Result<String> {
            Ok(format!("{} locations", result.records.len()))
        }
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl ResponseSummarizer for BrokenSummarizer {
        async fn summarize(
            &self,
            _question: &str,
            _intent: &QueryIntent,
            _result: &ExecutionResult,
        ) -> Result<String> {
            Err(QueryError::SummaryFailure("quota exceeded".to_string()))
        }

        async fn summarize_cross(
            &self,
            _question: &str,
            _intent: &CrossCollectionIntent,
            _result: &ExecutionResult,
        ) -> Result<String> {
            Err(QueryError::SummaryFailure("quota exceeded".to_string()))
        }
    }

    fn store() -> InMemoryStore {
        InMemoryStore::new().with_documents(
            "schools",
            vec![
                json!({"code": "1", "location": "Pune", "status": "active", "income": 100}),
                json!({"code": "2", "location": "Goa", "status": "active", "income": 40}),
            ],
        )
    }

    fn parser() -> FixedParser {
        FixedParser {
            intent: Some(QueryIntent::new(Metric::Income).with_collections(["schools"])),
        }
    }

    #[tokio::test]
    async fn test_answer_with_summary() {
        let assistant = QueryAssistant::new(store(), EngineConfig::default(), parser())
            .with_summarizer(EchoSummarizer);
        let answer = assistant.answer("total income of schools").await.unwrap();

        assert_eq!(answer.aggregate.total, 140.0);
        assert_eq!(answer.summary.as_deref(), Some("2 records for income"));
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_data() {
        let assistant = QueryAssistant::new(store(), EngineConfig::default(), parser())
            .with_summarizer(BrokenSummarizer);
        let answer = assistant.answer("total income of schools").await.unwrap();

        assert_eq!(answer.result.records.len(), 2);
        assert_eq!(answer.aggregate.total, 140.0);
        assert!(answer.summary.is_none());

        let cross = assistant.answer_cross("income by location").await.unwrap();
        assert_eq!(cross.result.records.len(), 2);
        assert!(cross.summary.is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_is_fatal() {
        let assistant = QueryAssistant::new(
            store(),
            EngineConfig::default(),
            FixedParser { intent: None },
        );
        let err = assistant.answer("???").await.unwrap_err();

        assert!(matches!(err, QueryError::ParseFailure(_)));
        assert_eq!(assistant.executor().reader().store().read_count("schools"), 0);
    }

    #[tokio::test]
    async fn test_answer_cross_without_summarizer() {
        let assistant = QueryAssistant::new(store(), EngineConfig::default(), parser());
        let answer = assistant.answer_cross("income by location").await.unwrap();

        let locations: Vec<&str> = answer.result.records.iter().map(|r| r.code()).collect();
        assert_eq!(locations, vec!["Pune", "Goa"]);
        assert!(answer.summary.is_none());
    }
}
