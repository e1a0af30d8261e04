use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::llm::client::GeminiClient;
use crate::llm::prompts::{intent_prompt, SYSTEM_PROMPT_CROSS_INTENT};
use crate::llm::types::Content;
use crate::pipeline::IntentParser;
use crate::schema::{CrossCollectionIntent, QueryIntent};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;

/// [`IntentParser`] backed by Gemini structured output.
pub struct GeminiIntentParser {
    client: GeminiClient,
    model: String,
    system_prompt: String,
}

impl GeminiIntentParser {
    pub fn new(client: GeminiClient, config: &EngineConfig) -> Self {
        Self {
            client,
            model: config.gemini_model.clone(),
            system_prompt: intent_prompt(
                &config.finance_collections,
                &config.sports_collection,
                &config.education_collection,
                config.max_limit,
            ),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn request<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        text: &str,
        schema: serde_json::Value,
    ) -> Result<T> {
        let raw = self
            .client
            .generate_content(
                &self.model,
                system_prompt,
                vec![Content::user(text)],
                Some(schema),
                "application/json",
            )
            .await?;
        debug!("Intent response: {}", raw);
        parse_response(&raw)
    }
}

/// Decodes a model reply. Anything that is not the expected shape, including
/// metric or status names outside the known set, is a parse failure.
pub fn parse_response<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(trimmed).map_err(|e| QueryError::ParseFailure(e.to_string()))
}

#[async_trait]
impl IntentParser for GeminiIntentParser {
    async fn parse_intent(&self, text: &str) -> Result<QueryIntent> {
        let schema = QueryIntent::gemini_response_schema()?;
        self.request(&self.system_prompt, text, schema).await
    }

    async fn parse_cross_intent(&self, text: &str) -> Result<CrossCollectionIntent> {
        let schema = CrossCollectionIntent::gemini_response_schema()?;
        self.request(SYSTEM_PROMPT_CROSS_INTENT, text, schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Metric, SortOrder, StatusFilter};

    #[test]
    fn test_parse_response_accepts_fenced_json() {
        let raw = "```json\n{\"metric\":\"income\",\"collections\":[\"schools\"],\"status\":\"active\",\"sort\":\"desc\",\"limit\":1}\n```";
        let intent: QueryIntent = parse_response(raw).unwrap();
        assert_eq!(intent.metric, Metric::Income);
        assert_eq!(intent.status, StatusFilter::Active);
        assert_eq!(intent.sort, Some(SortOrder::Desc));
        assert_eq!(intent.limit, Some(1));
    }

    #[test]
    fn test_unknown_metric_is_parse_failure() {
        let err = parse_response::<QueryIntent>(r#"{"metric":"revenue","collections":[]}"#)
            .unwrap_err();
        assert!(matches!(err, QueryError::ParseFailure(_)));
    }

    #[test]
    fn test_garbage_is_parse_failure() {
        let err = parse_response::<CrossCollectionIntent>("I think you mean income").unwrap_err();
        assert!(matches!(err, QueryError::ParseFailure(_)));
    }

    #[test]
    fn test_prompt_lists_configured_collections() {
        let prompt = intent_prompt(&["a".to_string(), "b".to_string()], "s", "e", 10);
        assert!(prompt.contains("(a, b)"));
        assert!(prompt.contains("between 1 and 10"));
    }
}
