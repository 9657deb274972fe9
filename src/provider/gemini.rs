//! Google Gemini provider implementation.
//!
//! generateContent API with key-in-query authentication and native JSON
//! output mode. The key rides in the URL, so request URLs are never
//! logged.

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

pub struct GeminiProvider {
    base_url: String,
    model: String,
    /// Never logged, never echoed.
    api_key: String,
    client: Arc<Client>,
}

impl GeminiProvider {
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
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
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
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = serde_json::json!({
            "systemInstruction": {"parts": [{"text": prompt.system}]},
            "contents": [{"parts": [{"text": cap_prompt(&prompt.user, MAX_PROMPT_CHARS)}]}],
            "generationConfig": {
                "maxOutputTokens": MAX_REPLY_TOKENS,
                "temperature": 0.1,
                "responseMimeType": "application/json",
            },
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let generated: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse generateContent response: {}", e))
        })?;

        let content = generated
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("response has no candidates".to_string())
            })?;

        let (folder, confidence) = parse::parse_decision(content, DEFAULT_CONFIDENCE)?;
        let usage = generated.usage_metadata.unwrap_or_default();

        Ok(ProviderReply {
            folder,
            confidence,
            tokens_in: usage.prompt_token_count,
            tokens_out: usage.candidates_token_count,
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        let url = format!("{}/v1beta/models", self.base_url);

        let response = match self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
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
            // Gemini reports a bad key as 400 as well as 403.
            400 | 401 | 403 => ProviderHealth::AuthFailed,
            429 => ProviderHealth::RateLimited,
            status => ProviderHealth::Unreachable(format!("status {}", status)),
        }
    }
}
