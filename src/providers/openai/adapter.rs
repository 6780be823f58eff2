use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::models::*;
use crate::models::Message;
use crate::providers::traits::CompletionProvider;
use crate::providers::types::{CompletionError, CompletionRequest, CompletionResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiProvider {
    client: Client,
    endpoint: Url,
}

impl OpenAiProvider {
    /// `timeout` bounds the whole request; `None` waits indefinitely.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        let endpoint = Url::parse(&format!(
            "{}/v1/chat/completions",
            base.as_str().trim_end_matches('/')
        ))
        .with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .filter(|m| m.role.is_sent_upstream())
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let body = OpenAiRequest {
            model: request.model.clone(),
            messages: Self::build_messages(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        tracing::debug!(
            "POST {} model={} messages={}",
            self.endpoint,
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::unknown(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CompletionError::classify(status.as_u16(), &text));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::unknown(format!("Invalid response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| CompletionError::unknown("No content in response"))?;

        let (tokens_in, tokens_out) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        Ok(CompletionResponse {
            content,
            model: parsed.model.unwrap_or(request.model),
            tokens_in,
            tokens_out,
        })
    }
}
