//! Ollama provider implementation.
//!
//! Local inference, no API key. Classification goes through Ollama's
//! native generate endpoint with JSON output forced; health checking uses
//! the tags endpoint.

use super::{
    cap_prompt, parse, transport_error, upstream_error, LlmProvider, ProviderError,
    ProviderHealth, ProviderReply, MAX_PROMPT_CHARS,
};
use crate::prompt::RenderedPrompt;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f64 = 0.6;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaProvider {
    base_url: String,
    model: String,
    /// Shared HTTP client for connection pooling
    client: Arc<Client>,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, client: Arc<Client>) -> Self {
        Self {
            base_url,
            model,
            client,
        }
    }
}

/// Ollama /api/generate response format
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

/// Ollama /api/tags response format
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
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
        let url = format!("{}/api/generate", self.base_url);
        let full_prompt = format!(
            "{}\n\n{}",
            prompt.system,
            cap_prompt(&prompt.user, MAX_PROMPT_CHARS)
        );
        let body = serde_json::json!({
            "model": self.model,
            "prompt": full_prompt,
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let generate: GenerateResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse generate response: {}", e))
        })?;

        let (folder, confidence) = parse::parse_decision(&generate.response, DEFAULT_CONFIDENCE)?;

        Ok(ProviderReply {
            folder,
            confidence,
            tokens_in: generate.prompt_eval_count,
            tokens_out: generate.eval_count,
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        let url = format!("{}/api/tags", self.base_url);

        let response = match self
            .client
            .get(&url)
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

        let status = response.status();
        if !status.is_success() {
            return ProviderHealth::Unreachable(format!("status {}", status.as_u16()));
        }

        match response.json::<TagsResponse>().await {
            Ok(tags) => {
                // The configured model being absent is worth a warning but
                // Ollama itself is up.
                let base = self.model.split(':').next().unwrap_or(&self.model);
                let present = tags
                    .models
                    .iter()
                    .any(|m| m.name == self.model || m.name.split(':').next() == Some(base));
                if !present {
                    tracing::warn!(model = %self.model, "Configured model not found in Ollama");
                }
                ProviderHealth::Ok
            }
            Err(e) => ProviderHealth::Unreachable(format!("bad tags response: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{Language, TEMPLATE_VERSION};
    use mockito::Server;

    fn test_prompt() -> RenderedPrompt {
        RenderedPrompt {
            system: "system rules".to_string(),
            user: "classify this".to_string(),
            language: Language::En,
            template_version: TEMPLATE_VERSION,
        }
    }

    fn test_provider(base_url: String) -> OllamaProvider {
        OllamaProvider::new(base_url, "llama3".to_string(), Arc::new(Client::new()))
    }

    fn folders() -> Vec<String> {
        vec!["Invoices".to_string(), "Personal".to_string()]
    }

    #[tokio::test]
    async fn test_classify_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(
                r#"{
                "response": "{\"folder\": \"Invoices\", \"confidence\": 0.91}",
                "prompt_eval_count": 120,
                "eval_count": 18
            }"#,
            )
            .create_async()
            .await;

        let provider = test_provider(server.url());
        let reply = provider
            .classify(&test_prompt(), &folders(), Duration::from_secs(5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.folder, "Invoices");
        assert!((reply.confidence - 0.91).abs() < f64::EPSILON);
        assert_eq!(reply.tokens_in, 120);
        assert_eq!(reply.tokens_out, 18);
    }

    #[tokio::test]
    async fn test_classify_missing_confidence_uses_default() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(r#"{"response": "{\"folder\": \"Personal\"}"}"#)
            .create_async()
            .await;

        let provider = test_provider(server.url());
        let reply = provider
            .classify(&test_prompt(), &folders(), Duration::from_secs(5))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!((reply.confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_classify_upstream_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("Internal server error")
            .create_async()
            .await;

        let provider = test_provider(server.url());
        let result = provider
            .classify(&test_prompt(), &folders(), Duration::from_secs(5))
            .await;

        mock.assert_async().await;
        assert!(matches!(
            result,
            Err(ProviderError::Upstream { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_classify_unparseable_reply() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(200)
            .with_body(r#"{"response": "Invoices, probably"}"#)
            .create_async()
            .await;

        let provider = test_provider(server.url());
        let result = provider
            .classify(&test_prompt(), &folders(), Duration::from_secs(5))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_classify_network_error() {
        let provider = test_provider("http://invalid-host-that-does-not-exist:9999".to_string());
        let result = provider
            .classify(&test_prompt(), &folders(), Duration::from_secs(5))
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::Network(_) | ProviderError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3:latest"},{"name":"mistral:7b"}]}"#)
            .create_async()
            .await;

        let provider = test_provider(server.url());
        let health = provider.health_check().await;

        mock.assert_async().await;
        assert_eq!(health, ProviderHealth::Ok);
    }

    #[tokio::test]
    async fn test_health_check_server_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(500)
            .create_async()
            .await;

        let provider = test_provider(server.url());
        let health = provider.health_check().await;

        mock.assert_async().await;
        assert!(matches!(health, ProviderHealth::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_health_check_network_error() {
        let provider = test_provider("http://invalid-host-that-does-not-exist:9999".to_string());
        let health = provider.health_check().await;
        assert!(matches!(health, ProviderHealth::Unreachable(_)));
    }

    #[test]
    fn test_identity() {
        let provider = test_provider("http://localhost:11434".to_string());
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model_id(), "llama3");
    }
}
