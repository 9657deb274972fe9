//! Error types for provider operations.

use thiserror::Error;

/// How a failure counts against resilience policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport faults, 5xx, timeouts, unparseable replies. Counts
    /// toward the circuit breaker.
    Transient,
    /// 4xx (except 429) and configuration faults: a config problem, not
    /// a flapping dependency. Never counts toward the breaker.
    Permanent,
    /// The provider itself rate-limited us (429).
    RateLimitedRemote,
}

/// Errors that can occur during provider calls.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Network connectivity error (DNS, connection refused, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded deadline.
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Provider returned an error response (4xx, 5xx).
    #[error("Provider error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Provider response doesn't match the expected format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider configuration error (missing API key, bad endpoint).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Network(_)
            | ProviderError::Timeout(_)
            | ProviderError::InvalidResponse(_) => FailureKind::Transient,
            ProviderError::Upstream { status: 429, .. } => FailureKind::RateLimitedRemote,
            ProviderError::Upstream { status, .. } if (400..500).contains(status) => {
                FailureKind::Permanent
            }
            ProviderError::Upstream { .. } => FailureKind::Transient,
            ProviderError::Configuration(_) => FailureKind::Permanent,
        }
    }
}
