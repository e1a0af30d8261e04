use crate::error::{QueryError, Result};
use crate::llm::types::*;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One `generateContent` call returning the first text part.
    ///
    /// Rate-limit and server errors are retried with a short backoff; any
    /// other non-success status fails immediately.
    pub(crate) async fn generate_content(
        &self,
        model: &str,
        system_prompt: &str,
        messages: Vec<Content>,
        response_schema: Option<serde_json::Value>,
        response_mime_type: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents: messages,
            system_instruction: Some(Content::user(system_prompt)),
            generation_config: GenerationConfig {
                response_mime_type: response_mime_type.to_string(),
                response_schema,
                temperature: Some(0.0),
            },
        };

        let mut attempt = 1;
        let res = loop {
            let res = self.client.post(&url).json(&payload).send().await?;
            let status = res.status();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt >= MAX_ATTEMPTS {
                break res;
            }
            warn!(
                "Gemini returned {} (attempt {}/{}), retrying",
                status, attempt, MAX_ATTEMPTS
            );
            sleep(Duration::from_millis(500 * attempt as u64)).await;
            attempt += 1;
        };

        let status = res.status();
        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(QueryError::NetworkFailure(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json().await?;
        debug!("Gemini call to {} succeeded after {} attempt(s)", model, attempt);

        let part = body
            .candidates
            .ok_or_else(|| QueryError::ParseFailure("No candidates returned".to_string()))?
            .first()
            .ok_or_else(|| QueryError::ParseFailure("Empty candidates list".to_string()))?
            .content
            .parts
            .first()
            .ok_or_else(|| QueryError::ParseFailure("No parts in content".to_string()))?
            .clone();

        match part {
            Part::Text { text } => Ok(text),
        }
    }
}
