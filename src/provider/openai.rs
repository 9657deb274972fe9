//! OpenAI provider implementation.
//!
//! Chat completions with JSON mode and bearer authentication.

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

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OpenAiProvider {
    base_url: String,
    model: String,
    /// Never logged, never echoed.
    api_key: String,
    client: Arc<Client>,
}

impl OpenAiProvider {
    pub fn new(base_url: String, model: String, api_key: String, client: Arc<Client>) -> Self {
        Self {
            base_url,
            model,
            api_key,
            client,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
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
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": cap_prompt(&prompt.user, MAX_PROMPT_CHARS)},
            ],
            "temperature": 0.1,
            "max_tokens": MAX_REPLY_TOKENS,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse completion response: {}", e))
        })?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("completion has no choices".to_string())
            })?;

        let (folder, confidence) = parse::parse_decision(content, DEFAULT_CONFIDENCE)?;
        let usage = chat.usage.unwrap_or_default();

        Ok(ProviderReply {
            folder,
            confidence,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        let url = format!("{}/v1/models", self.base_url);

        let response = match self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
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
