//! Anthropic Claude provider implementation.
//!
//! Messages API with x-api-key authentication. Anthropic has no dedicated
//! health endpoint, so the probe is a one-token messages call.

use super::{
    cap_prompt, parse, transport_error, upstream_error, LlmProvider, ProviderError,
    ProviderHealth, ProviderReply, MAX_PROMPT_CHARS, MAX_REPLY_TOKENS,
};
use crate::prompt::RenderedPrompt;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIDENCE: f64 = 0.7;

const API_VERSION: &str = "2023-06-01";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AnthropicProvider {
    base_url: String,
    model: String,
    /// Never logged, never echoed.
    api_key: String,
    client: Arc<Client>,
}

impl AnthropicProvider {
    pub fn new(base_url: String, model: String, api_key: String, client: Arc<Client>) -> Self {
        Self {
            base_url,
            model,
            api_key,
            client,
        }
    }

    fn messages_request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn classify(
        &self,
        prompt: &RenderedPrompt,
        _folders: &[String],
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_REPLY_TOKENS,
            "temperature": 0.1,
            "system": prompt.system,
            "messages": [
                {"role": "user", "content": cap_prompt(&prompt.user, MAX_PROMPT_CHARS)},
            ],
        });

        let response = self
            .messages_request(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let messages: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse messages response: {}", e))
        })?;

        let content = messages
            .content
            .first()
            .map(|c| c.text.as_str())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("messages response has no content".to_string())
            })?;

        let (folder, confidence) = parse::parse_decision(content, DEFAULT_CONFIDENCE)?;
        let usage = messages.usage.unwrap_or_default();

        Ok(ProviderReply {
            folder,
            confidence,
            tokens_in: usage.input_tokens,
            tokens_out: usage.output_tokens,
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "ping"}],
        });

        let response = match self
            .messages_request(&body)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ProviderHealth::Unreachable("health check timed out".to_string())
            }
            Err(e) => return ProviderHealth::Unreachable(e.to_string()),
        };

        match response.status().as_u16() {
            200 => ProviderHealth::Ok,
            401 | 403 => ProviderHealth::AuthFailed,
            429 => ProviderHealth::RateLimited,
            status => ProviderHealth::Unreachable(format!("status {}", status)),
        }
    }
}
