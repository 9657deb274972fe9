//! Provider factory: instantiate an `LlmProvider` trait object from a
//! validated configuration block.

use super::{
    anthropic::AnthropicProvider, gemini::GeminiProvider, ollama::OllamaProvider,
    openai::OpenAiProvider, LlmProvider, ProviderError,
};
use crate::config::{ProviderConfig, ProviderKind};
use crate::signing::SecretStore;
use reqwest::Client;
use std::sync::Arc;

/// Default secret-store reference per cloud provider, used when the
/// config block does not name one.
fn default_key_ref(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Ollama => "",
        ProviderKind::OpenAi => "OPENAI_API_KEY",
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        ProviderKind::Gemini => "GEMINI_API_KEY",
    }
}

/// Resolve the API key for a cloud provider through the secret store.
/// The raw key goes straight into the adapter; it is never logged.
fn resolve_api_key(
    kind: ProviderKind,
    config: &ProviderConfig,
    secrets: &dyn SecretStore,
) -> Result<String, ProviderError> {
    let key_ref = config
        .api_key_ref
        .as_deref()
        .unwrap_or_else(|| default_key_ref(kind));

    let bytes = secrets
        .get(key_ref)
        .map_err(|e| ProviderError::Configuration(format!("secret store: {}", e)))?
        .ok_or_else(|| {
            ProviderError::Configuration(format!(
                "{} requires an API key; secret ref '{}' not found",
                kind, key_ref
            ))
        })?;

    String::from_utf8(bytes)
        .map_err(|_| ProviderError::Configuration(format!("secret ref '{}' is not UTF-8", key_ref)))
}

/// Create a provider from configuration.
///
/// Returns an `Arc<dyn LlmProvider>` ready for the orchestrator. The
/// shared HTTP client keeps connection pooling across engine reloads.
pub fn create_provider(
    kind: ProviderKind,
    config: &ProviderConfig,
    client: Arc<Client>,
    secrets: &dyn SecretStore,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let endpoint = config.endpoint.trim_end_matches('/').to_string();
    let model = config.model.clone();

    match kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(endpoint, model, client))),
        ProviderKind::OpenAi => {
            let api_key = resolve_api_key(kind, config, secrets)?;
            Ok(Arc::new(OpenAiProvider::new(endpoint, model, api_key, client)))
        }
        ProviderKind::Anthropic => {
            let api_key = resolve_api_key(kind, config, secrets)?;
            Ok(Arc::new(AnthropicProvider::new(
                endpoint, model, api_key, client,
            )))
        }
        ProviderKind::Gemini => {
            let api_key = resolve_api_key(kind, config, secrets)?;
            Ok(Arc::new(GeminiProvider::new(endpoint, model, api_key, client)))
        }
    }
}
