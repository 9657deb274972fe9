//! Shared test helpers: a scripted provider and engine builders.

#![allow(dead_code)]

use async_trait::async_trait;
use mailwarden::config::WardenConfig;
use mailwarden::orchestrator::{ClassificationRequest, Engine, Orchestrator};
use mailwarden::prompt::RenderedPrompt;
use mailwarden::provider::{LlmProvider, ProviderError, ProviderHealth, ProviderReply};
use mailwarden::signing::{MemorySecretStore, Signer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum Outcome {
    Reply { folder: String, confidence: f64 },
    Timeout,
    Network,
    Upstream(u16),
    Garbled,
}

impl Outcome {
    pub fn reply(folder: &str, confidence: f64) -> Self {
        Outcome::Reply {
            folder: folder.to_string(),
            confidence,
        }
    }
}

/// An `LlmProvider` that replays a script and records what it saw.
pub struct ScriptedProvider {
    name: &'static str,
    model: String,
    script: Mutex<VecDeque<Outcome>>,
    /// Replayed once the script is exhausted.
    fallback: Outcome,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<RenderedPrompt>>,
    health: ProviderHealth,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            name: "ollama",
            model: "llama3".to_string(),
            script: Mutex::new(outcomes.into()),
            fallback: Outcome::reply("Invoices", 0.91),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            health: ProviderHealth::Ok,
        }
    }

    pub fn answering(folder: &str, confidence: f64) -> Self {
        let mut provider = Self::new(vec![]);
        provider.fallback = Outcome::reply(folder, confidence);
        provider
    }

    pub fn with_health(mut self, health: ProviderHealth) -> Self {
        self.health = health;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<RenderedPrompt> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn classify(
        &self,
        prompt: &RenderedPrompt,
        _folders: &[String],
        _timeout: Duration,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            Outcome::Reply { folder, confidence } => Ok(ProviderReply {
                folder,
                confidence,
                tokens_in: 100,
                tokens_out: 10,
            }),
            Outcome::Timeout => Err(ProviderError::Timeout(30_000)),
            Outcome::Network => Err(ProviderError::Network("connection refused".to_string())),
            Outcome::Upstream(status) => Err(ProviderError::Upstream {
                status,
                message: "scripted".to_string(),
            }),
            Outcome::Garbled => Err(ProviderError::InvalidResponse(
                "no JSON object in model reply".to_string(),
            )),
        }
    }

    async fn health_check(&self) -> ProviderHealth {
        self.health.clone()
    }
}

/// Config tuned for tests: generous rate budget, known thresholds.
pub fn test_config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.rate_limit_per_min = 1000;
    config.batch.rate_limit_per_min = 1000;
    config.thresholds.insert("Invoices".to_string(), 0.85);
    config.runtime.workers = 2;
    config
}

pub fn orchestrator_with(provider: Arc<ScriptedProvider>, config: WardenConfig) -> Orchestrator {
    Orchestrator::from_engine(
        Engine::with_provider(config, provider, None),
        Arc::new(MemorySecretStore::new()),
    )
}

pub fn signing_orchestrator_with(
    provider: Arc<ScriptedProvider>,
    config: WardenConfig,
    key: &[u8],
) -> Orchestrator {
    Orchestrator::from_engine(
        Engine::with_provider(config, provider, Some(Signer::new(key.to_vec()))),
        Arc::new(MemorySecretStore::new()),
    )
}

/// A typical invoice message request.
pub fn invoice_request() -> ClassificationRequest {
    ClassificationRequest {
        request_id: "r1".to_string(),
        message_id: "m1".to_string(),
        subject: "Invoice #42".to_string(),
        sender: "billing@example.com".to_string(),
        body: "Please find attached invoice.".to_string(),
        folders: vec![
            "Invoices".to_string(),
            "Newsletters".to_string(),
            "Personal".to_string(),
        ],
        attachments: vec![],
        mode: None,
        origin: None,
    }
}

pub fn request_with_body(request_id: &str, body: &str) -> ClassificationRequest {
    let mut request = invoice_request();
    request.request_id = request_id.to_string();
    request.message_id = format!("msg-{}", request_id);
    request.body = body.to_string();
    request
}
