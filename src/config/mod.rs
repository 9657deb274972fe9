//! Configuration module for Mailwarden
//!
//! Loads and validates the JSON configuration file. Unknown keys are
//! rejected at every level so stale or misspelled settings fail loudly
//! instead of drifting silently.

pub mod error;
pub mod logging;
pub mod provider;
pub mod resilience;
pub mod signing;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use provider::{ProviderConfig, ProviderKind};
pub use resilience::{BatchConfig, CacheConfig, CircuitBreakerConfig, RuntimeConfig};
pub use signing::{SecretBackend, SecretsConfig, SigningConfig};

use crate::privacy::AnalysisMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn default_rate_limit() -> u32 {
    10
}

fn default_language() -> String {
    "en".to_string()
}

fn default_thresholds() -> HashMap<String, f64> {
    let mut map = HashMap::new();
    map.insert("default".to_string(), 0.55);
    map.insert("Archive".to_string(), 0.6);
    map.insert("Spam".to_string(), 0.85);
    map.insert("Trash".to_string(), 0.9);
    map
}

/// Main configuration struct holding all sub-configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenConfig {
    /// Active provider; exactly one is consulted per request.
    pub provider: ProviderKind,
    pub ollama: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub gemini: Option<ProviderConfig>,

    pub analysis_mode: AnalysisMode,
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Per-folder confidence thresholds; the `default` key is the fallback.
    #[serde(default = "default_thresholds")]
    pub thresholds: HashMap<String, f64>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_min: u32,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub signing: SigningConfig,
    pub secrets: SecretsConfig,
    pub batch: BatchConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            ollama: None,
            openai: None,
            anthropic: None,
            gemini: None,
            analysis_mode: AnalysisMode::Full,
            default_language: default_language(),
            thresholds: default_thresholds(),
            rate_limit_per_min: default_rate_limit(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            signing: SigningConfig::default(),
            secrets: SecretsConfig::default(),
            batch: BatchConfig::default(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WardenConfig {
    /// Load configuration from a JSON file.
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration received over the wire (`set_config`).
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MAILWARDEN_*).
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("MAILWARDEN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MAILWARDEN_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }
        if let Ok(provider) = std::env::var("MAILWARDEN_PROVIDER") {
            if let Ok(p) = serde_json::from_value(serde_json::Value::String(provider)) {
                self.provider = p;
            }
        }
        self
    }

    /// The configuration block for the active provider, with built-in
    /// defaults when the file omits the block.
    pub fn active_provider(&self) -> ProviderConfig {
        let block = match self.provider {
            ProviderKind::Ollama => &self.ollama,
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Gemini => &self.gemini,
        };
        block
            .clone()
            .unwrap_or_else(|| ProviderConfig::defaults_for(self.provider))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (folder, threshold) in &self.thresholds {
            if !(0.0..=1.0).contains(threshold) {
                return Err(ConfigError::Validation {
                    field: format!("thresholds.{}", folder),
                    message: "threshold must be within [0.0, 1.0]".to_string(),
                });
            }
        }
        if self.rate_limit_per_min == 0 {
            return Err(ConfigError::Validation {
                field: "rate_limit_per_min".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.batch.rate_limit_per_min == 0 {
            return Err(ConfigError::Validation {
                field: "batch.rate_limit_per_min".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.circuit_breaker.failures == 0 {
            return Err(ConfigError::Validation {
                field: "circuit_breaker.failures".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Validation {
                field: "cache.capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.runtime.workers == 0 {
            return Err(ConfigError::Validation {
                field: "runtime.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.runtime.queue_depth == 0 {
            return Err(ConfigError::Validation {
                field: "runtime.queue_depth".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let active = self.active_provider();
        if !active.enabled {
            return Err(ConfigError::Validation {
                field: format!("{}.enabled", self.provider),
                message: "active provider is disabled".to_string(),
            });
        }
        if active.endpoint.is_empty() {
            return Err(ConfigError::Validation {
                field: format!("{}.endpoint", self.provider),
                message: "endpoint cannot be empty".to_string(),
            });
        }
        if active.model.is_empty() {
            return Err(ConfigError::Validation {
                field: format!("{}.model", self.provider),
                message: "model cannot be empty".to_string(),
            });
        }
        if active.timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: format!("{}.timeout_ms", self.provider),
                message: "timeout must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}
