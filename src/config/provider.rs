//! Provider selection and per-provider configuration blocks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Supported LLM providers. Closed set: adding a provider means adding a
/// variant and its adapter, not a runtime registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Whether the provider runs on the local host (no API key required).
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration block for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub endpoint: String,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Opaque handle into the secret store; never the key itself.
    pub api_key_ref: Option<String>,
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: String::new(),
            timeout_ms: 30_000,
            api_key_ref: None,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// Built-in defaults for a provider the config file omits.
    pub fn defaults_for(kind: ProviderKind) -> Self {
        let (endpoint, model) = match kind {
            ProviderKind::Ollama => ("http://localhost:11434", "llama3"),
            ProviderKind::OpenAi => ("https://api.openai.com", "gpt-4o-mini"),
            ProviderKind::Anthropic => ("https://api.anthropic.com", "claude-3-5-haiku-latest"),
            ProviderKind::Gemini => (
                "https://generativelanguage.googleapis.com",
                "gemini-2.0-flash",
            ),
        };
        Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
