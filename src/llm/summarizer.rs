use crate::aggregator::aggregate;
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::executor::{describe_execution, ExecutionResult};
use crate::llm::client::GeminiClient;
use crate::llm::prompts::SYSTEM_PROMPT_SUMMARY;
use crate::llm::types::Content;
use crate::pipeline::ResponseSummarizer;
use crate::record::Record;
use crate::schema::{CrossCollectionIntent, Metric, QueryIntent};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Rows sent to the model per answer. Totals are computed over all rows.
const MAX_ROWS_IN_PROMPT: usize = 25;

/// [`ResponseSummarizer`] that asks Gemini for a one or two sentence answer.
pub struct GeminiSummarizer {
    client: GeminiClient,
    model: String,
}

impl GeminiSummarizer {
    pub fn new(client: GeminiClient, config: &EngineConfig) -> Self {
        Self {
            client,
            model: config.gemini_model.clone(),
        }
    }

    async fn request(&self, question: &str, context: Value) -> Result<String> {
        let message = format!(
            "Question: {}\n\nQuery result (JSON):\n{}",
            question,
            serde_json::to_string_pretty(&context)?
        );
        let text = self
            .client
            .generate_content(
                &self.model,
                SYSTEM_PROMPT_SUMMARY,
                vec![Content::user(message)],
                None,
                "text/plain",
            )
            .await
            .map_err(|e| QueryError::SummaryFailure(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(QueryError::SummaryFailure("Model returned an empty summary".to_string()));
        }
        Ok(text.to_string())
    }
}

fn row_summary(record: &Record, metrics: &[Metric]) -> Value {
    let values: serde_json::Map<String, Value> = metrics
        .iter()
        .map(|m| (m.to_string(), json!(record.metric_value(*m))))
        .collect();
    json!({
        "code": record.code(),
        "name": record.name(),
        "location": record.location(),
        "type": record.institution_type(),
        "status": record.status().as_str(),
        "collection": record.collection(),
        "values": values,
    })
}

/// Compact view of a single-metric result for the prompt.
pub fn summary_context(intent: &QueryIntent, result: &ExecutionResult) -> Value {
    let totals = aggregate(&result.records, intent);
    let rows: Vec<Value> = result
        .records
        .iter()
        .take(MAX_ROWS_IN_PROMPT)
        .map(|r| row_summary(r, &[intent.metric]))
        .collect();
    json!({
        "metric": intent.metric,
        "total": totals.total,
        "breakdown": totals.breakdown,
        "record_count": result.records.len(),
        "rows": rows,
        "execution": describe_execution(intent, result),
    })
}

#[async_trait]
impl ResponseSummarizer for GeminiSummarizer {
    async fn summarize(
        &self,
        question: &str,
        intent: &QueryIntent,
        result: &ExecutionResult,
    ) -> Result<String> {
        self.request(question, summary_context(intent, result)).await
    }

    async fn summarize_cross(
        &self,
        question: &str,
        intent: &CrossCollectionIntent,
        result: &ExecutionResult,
    ) -> Result<String> {
        let rows: Vec<Value> = result
            .records
            .iter()
            .take(MAX_ROWS_IN_PROMPT)
            .map(|r| row_summary(r, &intent.metrics))
            .collect();
        let context = json!({
            "metrics": intent.metrics,
            "location_count": result.records.len(),
            "rows": rows,
        });
        self.request(question, context).await
    }
}
