//! Provider abstraction layer.
//!
//! The `LlmProvider` trait hides each backend's HTTP protocol, auth
//! scheme and response shape behind one classification operation. The
//! variant set is closed: adding a provider means adding an adapter and a
//! factory arm, not a runtime registry.

use async_trait::async_trait;
use std::time::Duration;

pub mod anthropic;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub(crate) mod parse;

pub use error::{FailureKind, ProviderError};

use crate::prompt::RenderedPrompt;

/// Upper bound on the user block an adapter will ship, in characters.
/// Applied even if the caller supplies more.
pub const MAX_PROMPT_CHARS: usize = 6000;

/// Output token budget for a classification reply.
pub(crate) const MAX_REPLY_TOKENS: u32 = 150;

/// Result of a provider health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderHealth {
    Ok,
    Unreachable(String),
    AuthFailed,
    RateLimited,
}

impl ProviderHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProviderHealth::Ok)
    }
}

/// A parsed classification reply from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    /// Folder name exactly as the model produced it. Adapters never
    /// substitute or fuzzy-correct; the allow-list check happens in the
    /// orchestrator so the rejection is visible in the rationale tag.
    pub folder: String,
    pub confidence: f64,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Unified interface for all LLM providers.
///
/// Object-safe and used as `Arc<dyn LlmProvider>`. All async methods are
/// cancellation-safe: dropping the future aborts the in-flight HTTP
/// request.
///
/// Implementations must never log prompt content.
#[async_trait]
pub trait LlmProvider: Send + Sync + 'static {
    /// Stable provider identifier (e.g. "ollama").
    fn name(&self) -> &'static str;

    /// Currently configured model.
    fn model_id(&self) -> &str;

    /// Ask the model to pick one of `folders` for the rendered prompt.
    async fn classify(
        &self,
        prompt: &RenderedPrompt,
        folders: &[String],
        timeout: Duration,
    ) -> Result<ProviderReply, ProviderError>;

    /// Probe the backend without classifying anything.
    async fn health_check(&self) -> ProviderHealth;
}

/// Cap a prompt block at `max_chars` characters.
pub(crate) fn cap_prompt(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text.to_string()
    }
}

/// Map a reqwest transport error to a provider error.
pub(crate) fn transport_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout.as_millis() as u64)
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-success HTTP response into an upstream error, keeping only
/// a bounded slice of the body for diagnostics.
pub(crate) async fn upstream_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = cap_prompt(&message, 300);
    ProviderError::Upstream { status, message }
}
