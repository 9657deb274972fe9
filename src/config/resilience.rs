//! Resilience policy configuration: circuit breaker, cache, batch, runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens.
    pub failures: u32,
    /// Time the circuit stays open before admitting a probe.
    pub cooldown_ms: u64,
    /// Count repeated folder rejections as breaker failures.
    pub count_folder_rejections: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failures: 3,
            cooldown_ms: 30_000,
            count_folder_rejections: false,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Decision cache tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_ms: 3_600_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Deferred-batch tuning. Batch work runs under the same resilience
/// policies as real-time work but with its own, more generous rate budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub rate_limit_per_min: u32,
    /// At or below this many items, a labeled request stays real-time.
    pub realtime_threshold: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_min: 60,
            realtime_threshold: 5,
        }
    }
}

/// Host loop scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Worker tasks draining the classification queue.
    pub workers: usize,
    /// Bounded work queue depth; full queue refuses classify frames.
    pub queue_depth: usize,
    /// Drain budget on shutdown before workers are aborted.
    pub grace_period_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
            grace_period_ms: 5_000,
        }
    }
}

impl RuntimeConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
