//! Classification orchestrator: the single-request pipeline.
//!
//! Every classify call runs the same straight-line sequence: validate,
//! sanitize, cache lookup, prompt, rate limit, circuit gate, provider
//! call, folder validation, threshold policy, calibration, signing, cache
//! insert. No stage throws out of the pipeline; every failure maps to a
//! well-formed fallback decision with a specific rationale tag.

pub mod types;

pub use types::{
    AttachmentMeta, ClassificationDecision, ClassificationRequest, RationaleTag, INBOX_FALLBACK,
    MAX_SUBJECT_BYTES,
};

use crate::breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::cache::{self, CacheStats, DecisionCache};
use crate::calibration::{CalibrationStat, ConfidenceCalibrator, Outcome, ThresholdPolicy};
use crate::config::{ConfigError, WardenConfig};
use crate::limiter::{Admission, BucketStatus, RateLimiter};
use crate::privacy::PrivacyGuard;
use crate::prompt::{PromptEngine, TEMPLATE_VERSION};
use crate::provider::{factory, FailureKind, LlmProvider, ProviderError, ProviderHealth};
use crate::signing::{render_header, SecretStore, SecretStoreError, Signer};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use thiserror::Error;

/// The one fail-fast path: a request whose shape is unusable.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Errors building or replacing an engine snapshot.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("secret store: {0}")]
    Secrets(#[from] SecretStoreError),

    #[error("signing enabled but key ref '{0}' was not found in the secret store")]
    SigningKeyMissing(String),
}

/// Per-call behavior knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyOptions {
    /// Sleep out rate-limiter denials instead of falling back.
    pub wait_for_rate_slot: bool,
    /// Draw admission from the relaxed batch budget.
    pub relaxed_rate: bool,
}

impl ClassifyOptions {
    pub fn realtime() -> Self {
        Self::default()
    }

    pub fn batch() -> Self {
        Self {
            wait_for_rate_slot: true,
            relaxed_rate: true,
        }
    }
}

/// Aggregate component health for the health frame.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub provider_name: String,
    pub provider_health: ProviderHealth,
    pub breaker_state: CircuitState,
}

/// Aggregate statistics for the stats frame.
#[derive(Debug, Clone)]
pub struct StatsBundle {
    pub cache: CacheStats,
    pub circuit: CircuitSnapshot,
    pub rate: BucketStatus,
    pub calibration: Vec<CalibrationStat>,
}

/// One consistent view of configuration and components. Replaced
/// atomically by pointer swap on reload: a request observes exactly one
/// snapshot for its whole pipeline.
pub struct Engine {
    pub config: Arc<WardenConfig>,
    provider: Arc<dyn LlmProvider>,
    privacy: PrivacyGuard,
    prompts: PromptEngine,
    limiter: RateLimiter,
    batch_limiter: RateLimiter,
    breaker: CircuitBreaker,
    cache: DecisionCache,
    calibrator: ConfidenceCalibrator,
    signer: Option<Signer>,
}

impl Engine {
    /// Build a snapshot from validated configuration, creating the
    /// provider through the factory.
    pub fn from_config(
        config: WardenConfig,
        client: Arc<Client>,
        secrets: &dyn SecretStore,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let provider_config = config.active_provider();
        let provider = factory::create_provider(config.provider, &provider_config, client, secrets)?;
        let signer = Self::build_signer(&config, secrets)?;
        Ok(Self::assemble(config, provider, signer))
    }

    /// Build a snapshot around an injected provider (tests, probes).
    pub fn with_provider(
        config: WardenConfig,
        provider: Arc<dyn LlmProvider>,
        signer: Option<Signer>,
    ) -> Self {
        Self::assemble(config, provider, signer)
    }

    fn build_signer(
        config: &WardenConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Option<Signer>, EngineError> {
        if !config.signing.enabled {
            return Ok(None);
        }
        let key = secrets
            .get(&config.signing.key_ref)?
            .ok_or_else(|| EngineError::SigningKeyMissing(config.signing.key_ref.clone()))?;
        Ok(Some(Signer::new(key)))
    }

    fn assemble(
        config: WardenConfig,
        provider: Arc<dyn LlmProvider>,
        signer: Option<Signer>,
    ) -> Self {
        let rate = config.rate_limit_per_min;
        let batch_rate = config.batch.rate_limit_per_min;
        Self {
            privacy: PrivacyGuard::new(),
            prompts: PromptEngine::new(&config.default_language),
            limiter: RateLimiter::new(rate, rate),
            batch_limiter: RateLimiter::new(batch_rate, batch_rate),
            breaker: CircuitBreaker::new(
                config.circuit_breaker.failures,
                config.circuit_breaker.cooldown(),
            ),
            cache: DecisionCache::new(config.cache.capacity, config.cache.ttl()),
            calibrator: ConfidenceCalibrator::new(ThresholdPolicy::from_map(&config.thresholds)),
            signer,
            provider,
            config: Arc::new(config),
        }
    }

    /// Read-only breaker access for tests and diagnostics.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }
}

/// The coordination core. Owns the swappable engine snapshot.
pub struct Orchestrator {
    engine: RwLock<Arc<Engine>>,
    client: Arc<Client>,
    secrets: Arc<dyn SecretStore>,
}

impl Orchestrator {
    pub fn new(config: WardenConfig, secrets: Arc<dyn SecretStore>) -> Result<Self, EngineError> {
        let client = Arc::new(Client::new());
        let engine = Engine::from_config(config, Arc::clone(&client), secrets.as_ref())?;
        Ok(Self {
            engine: RwLock::new(Arc::new(engine)),
            client,
            secrets,
        })
    }

    /// Wrap a pre-built engine (tests inject scripted providers here).
    pub fn from_engine(engine: Engine, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            engine: RwLock::new(Arc::new(engine)),
            client: Arc::new(Client::new()),
            secrets,
        }
    }

    /// The current snapshot. Cloned out so the pointer swap in
    /// [`reload`](Self::reload) never blocks an in-flight request.
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine.read().expect("engine lock poisoned"))
    }

    /// Validate and publish a new configuration. On failure the previous
    /// snapshot stays in effect.
    pub fn reload(&self, config: WardenConfig) -> Result<(), EngineError> {
        let engine = Engine::from_config(config, Arc::clone(&self.client), self.secrets.as_ref())?;
        *self.engine.write().expect("engine lock poisoned") = Arc::new(engine);
        tracing::info!("Configuration reloaded, engine snapshot swapped");
        Ok(())
    }

    pub fn config_value(&self) -> serde_json::Value {
        serde_json::to_value(self.engine().config.as_ref()).unwrap_or(serde_json::Value::Null)
    }

    /// Render the classification header for a finished decision.
    pub fn header_for(&self, decision: &ClassificationDecision) -> String {
        render_header(
            &decision.target_folder,
            decision.confidence,
            decision.signature.as_deref(),
        )
    }

    /// The single-request pipeline.
    pub async fn classify(
        &self,
        request: &ClassificationRequest,
        options: ClassifyOptions,
    ) -> Result<ClassificationDecision, RequestError> {
        let engine = self.engine();
        let started = Instant::now();

        // 1. Shape validation: the only fail-fast stage.
        validate_request(request)?;

        let provider_name = engine.provider.name();
        let model_name = engine.provider.model_id().to_string();

        // 2. Privacy guard in the effective mode.
        let mode = request.mode.unwrap_or(engine.config.analysis_mode);
        let mut sanitized = engine
            .privacy
            .sanitize(
                &request.subject,
                &request.sender,
                &request.body,
                &request.attachments,
                mode,
            )
            .map_err(|e| RequestError::Invalid(e.to_string()))?;
        let language = engine
            .prompts
            .detect_language(&sanitized.subject, &sanitized.body);
        sanitized.detected_language = Some(language.code().to_string());

        // 3. Cache lookup over the sanitized fingerprint.
        let key = cache::fingerprint(
            &sanitized,
            &request.folders,
            provider_name,
            &model_name,
            TEMPLATE_VERSION,
        );
        if let Some(hit) = engine.cache.get(&key) {
            let mut decision = ClassificationDecision {
                target_folder: hit.target_folder,
                confidence: hit.confidence,
                rationale_tag: RationaleTag::CacheHit,
                signature: None,
                latency_ms: elapsed_ms(started),
                provider_name: hit.provider_name,
                model_name: hit.model_name,
            };
            self.sign(&engine, &mut decision, &request.message_id);
            tracing::debug!(request_id = %request.request_id, folder = %decision.target_folder, "Cache hit");
            return Ok(decision);
        }

        // 4. Render the prompt.
        let prompt = engine.prompts.render(&sanitized, &request.folders, mode);

        // 5. Rate limiter admission.
        let limiter = if options.relaxed_rate {
            &engine.batch_limiter
        } else {
            &engine.limiter
        };
        loop {
            match limiter.try_acquire(provider_name) {
                Admission::Admitted => break,
                Admission::RetryAfter(wait) if options.wait_for_rate_slot => {
                    tokio::time::sleep(wait).await;
                }
                Admission::RetryAfter(_) => {
                    tracing::debug!(request_id = %request.request_id, "Rate limited");
                    return Ok(self.fallback(
                        &engine,
                        RationaleTag::RateLimited,
                        &request.message_id,
                        started,
                    ));
                }
            }
        }

        // 6. Circuit breaker gate.
        if !engine.breaker.try_acquire(provider_name) {
            tracing::debug!(request_id = %request.request_id, "Circuit open, failing fast");
            return Ok(self.fallback(
                &engine,
                RationaleTag::CircuitOpen,
                &request.message_id,
                started,
            ));
        }

        // 7. Provider call under the configured deadline.
        let timeout = engine.config.active_provider().timeout();
        let reply = match engine
            .provider
            .classify(&prompt, &request.folders, timeout)
            .await
        {
            Ok(reply) => {
                engine.breaker.record_success(provider_name);
                reply
            }
            Err(e) => {
                match e.kind() {
                    FailureKind::Transient => engine.breaker.record_failure(provider_name),
                    FailureKind::Permanent | FailureKind::RateLimitedRemote => {
                        engine.breaker.release(provider_name)
                    }
                }
                tracing::warn!(request_id = %request.request_id, error = %e, "Provider call failed");
                return Ok(self.fallback(
                    &engine,
                    RationaleTag::ProviderFailed,
                    &request.message_id,
                    started,
                ));
            }
        };

        // 8. Folder allow-list check, case-sensitive.
        if !request.folders.iter().any(|f| *f == reply.folder) {
            tracing::warn!(
                request_id = %request.request_id,
                "Model returned a folder outside the candidate list"
            );
            if engine.config.circuit_breaker.count_folder_rejections {
                engine.breaker.record_failure(provider_name);
            }
            return Ok(self.fallback(
                &engine,
                RationaleTag::FolderRejected,
                &request.message_id,
                started,
            ));
        }

        // 9. Threshold policy.
        if !engine.calibrator.passes(&reply.folder, reply.confidence) {
            engine
                .calibrator
                .record(&reply.folder, provider_name, Outcome::Rejected);
            tracing::debug!(
                request_id = %request.request_id,
                confidence = reply.confidence,
                threshold = engine.calibrator.threshold(&reply.folder),
                "Below threshold"
            );
            return Ok(self.fallback(
                &engine,
                RationaleTag::ThresholdRejected,
                &request.message_id,
                started,
            ));
        }

        // 10. Calibration bookkeeping.
        engine
            .calibrator
            .record(&reply.folder, provider_name, Outcome::Accepted);

        // 11. Optional signing, 12. cache insert, 13. emit.
        let mut decision = ClassificationDecision {
            target_folder: reply.folder,
            confidence: reply.confidence,
            rationale_tag: RationaleTag::ModelDecided,
            signature: None,
            latency_ms: elapsed_ms(started),
            provider_name: provider_name.to_string(),
            model_name,
        };
        self.sign(&engine, &mut decision, &request.message_id);
        engine.cache.insert(key, &decision);
        metrics::counter!("mailwarden_classifications", "rationale" => "model_decided")
            .increment(1);
        tracing::info!(
            request_id = %request.request_id,
            folder = %decision.target_folder,
            confidence = decision.confidence,
            latency_ms = decision.latency_ms,
            tokens_in = reply.tokens_in,
            tokens_out = reply.tokens_out,
            "Classified"
        );
        Ok(decision)
    }

    /// Build the fallback decision for a failed stage.
    fn fallback(
        &self,
        engine: &Engine,
        rationale: RationaleTag,
        message_id: &str,
        started: Instant,
    ) -> ClassificationDecision {
        let mut decision = ClassificationDecision {
            target_folder: INBOX_FALLBACK.to_string(),
            confidence: 0.0,
            rationale_tag: rationale,
            signature: None,
            latency_ms: elapsed_ms(started),
            provider_name: engine.provider.name().to_string(),
            model_name: engine.provider.model_id().to_string(),
        };
        self.sign(engine, &mut decision, message_id);
        metrics::counter!("mailwarden_classifications", "rationale" => rationale.as_str())
            .increment(1);
        decision
    }

    fn sign(&self, engine: &Engine, decision: &mut ClassificationDecision, message_id: &str) {
        if let Some(signer) = &engine.signer {
            decision.signature = Some(signer.sign(
                &decision.target_folder,
                decision.confidence,
                &decision.provider_name,
                &decision.model_name,
                message_id,
            ));
        }
    }

    /// Record user feedback into the calibration windows.
    pub fn feedback(&self, previous_folder: Option<&str>, actual_folder: &str) {
        let engine = self.engine();
        let provider = engine.provider.name();
        match previous_folder {
            Some(previous) if previous != actual_folder => {
                engine.calibrator.record(previous, provider, Outcome::Overridden);
                tracing::debug!(previous, actual = actual_folder, "Feedback: override");
            }
            Some(previous) => {
                engine.calibrator.record(previous, provider, Outcome::Accepted);
            }
            None => {
                tracing::debug!(actual = actual_folder, "Feedback without prior prediction");
            }
        }
    }

    /// Probe the provider and summarize component health.
    pub async fn health(&self) -> HealthReport {
        let engine = self.engine();
        let provider_name = engine.provider.name().to_string();
        let provider_health = engine.provider.health_check().await;
        HealthReport {
            breaker_state: engine.breaker.state(&provider_name),
            provider_name,
            provider_health,
        }
    }

    pub fn stats(&self) -> StatsBundle {
        let engine = self.engine();
        let provider_name = engine.provider.name();
        StatsBundle {
            cache: engine.cache.stats(),
            circuit: engine.breaker.snapshot(provider_name),
            rate: engine.limiter.status(provider_name),
            calibration: engine.calibrator.stats(),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Shape validation. Folder uniqueness is enforced here; order is
/// preserved for the prompt.
fn validate_request(request: &ClassificationRequest) -> Result<(), RequestError> {
    if request.folders.is_empty() {
        return Err(RequestError::Invalid(
            "candidate folder list is empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for folder in &request.folders {
        if folder.is_empty() {
            return Err(RequestError::Invalid(
                "candidate folder name is empty".to_string(),
            ));
        }
        if !seen.insert(folder.as_str()) {
            return Err(RequestError::Invalid(format!(
                "duplicate candidate folder '{}'",
                folder
            )));
        }
    }
    if request.subject.len() > MAX_SUBJECT_BYTES {
        return Err(RequestError::Invalid(format!(
            "subject exceeds {} bytes",
            MAX_SUBJECT_BYTES
        )));
    }
    Ok(())
}
