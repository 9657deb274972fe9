//! Signing and secret-store configuration.

use serde::{Deserialize, Serialize};

/// HMAC signing of classification results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    pub enabled: bool,
    /// Handle into the secret store for the HMAC key.
    pub key_ref: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_ref: "MAILWARDEN_HMAC_KEY".to_string(),
        }
    }
}

/// Which secret-store adapter backs `api_key_ref` / `key_ref` lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackend {
    /// Refs are environment variable names.
    #[default]
    Env,
    /// Refs are file names under `dir`.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    pub backend: SecretBackend,
    /// Directory for the file backend.
    pub dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_defaults() {
        let config = SigningConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.key_ref, "MAILWARDEN_HMAC_KEY");
    }

    #[test]
    fn test_secret_backend_serde() {
        let backend: SecretBackend = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(backend, SecretBackend::File);
    }
}
