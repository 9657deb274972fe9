//! Circuit breaker for provider resilience.
//!
//! One circuit per provider. Transient failures and timeouts count;
//! permanent (4xx) errors indicate a configuration problem and do not.
//! The open state fails fast until the cooldown elapses, then a single
//! probe decides between closing and re-opening.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,
    /// Failing, calls rejected.
    Open,
    /// Testing recovery with a single probe.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitData {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    total_failures: u64,
    total_calls: u64,
}

impl CircuitData {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            total_failures: 0,
            total_calls: 0,
        }
    }
}

/// Read-only view for tests and the stats frame.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub seconds_since_opened: Option<f64>,
    pub total_failures: u64,
    pub total_calls: u64,
}

/// Per-provider circuit breaker.
pub struct CircuitBreaker {
    circuits: DashMap<String, Mutex<CircuitData>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            circuits: DashMap::new(),
            threshold,
            cooldown,
        }
    }

    fn with_circuit<T>(&self, provider: &str, f: impl FnOnce(&mut CircuitData) -> T) -> T {
        let circuit = self
            .circuits
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(CircuitData::new()));
        let mut data = circuit.lock().expect("circuit lock poisoned");
        f(&mut data)
    }

    /// Whether a call may proceed. Handles the open-to-half-open
    /// transition and reserves the half-open probe slot.
    pub fn try_acquire(&self, provider: &str) -> bool {
        self.try_acquire_at(provider, Instant::now())
    }

    pub fn try_acquire_at(&self, provider: &str, now: Instant) -> bool {
        self.with_circuit(provider, |data| match data.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = data
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.cooldown {
                    data.state = CircuitState::HalfOpen;
                    data.probe_in_flight = true;
                    tracing::info!(provider, "Circuit half-open, probing recovery");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // One probe at a time.
                if data.probe_in_flight {
                    false
                } else {
                    data.probe_in_flight = true;
                    true
                }
            }
        })
    }

    /// Record a successful call. Closes a half-open circuit.
    pub fn record_success(&self, provider: &str) {
        self.with_circuit(provider, |data| {
            data.total_calls += 1;
            data.consecutive_failures = 0;
            data.probe_in_flight = false;
            if data.state == CircuitState::HalfOpen {
                data.state = CircuitState::Closed;
                data.opened_at = None;
                tracing::info!(provider, "Circuit closed (recovered)");
            }
        });
    }

    /// Release an admission without recording an outcome. Used for
    /// permanent errors, which must not count toward the breaker but
    /// still have to free a half-open probe slot.
    pub fn release(&self, provider: &str) {
        self.with_circuit(provider, |data| {
            data.probe_in_flight = false;
        });
    }

    /// Record a breaker-relevant failure (transient or timeout).
    pub fn record_failure(&self, provider: &str) {
        self.record_failure_at(provider, Instant::now());
    }

    pub fn record_failure_at(&self, provider: &str, now: Instant) {
        self.with_circuit(provider, |data| {
            data.total_calls += 1;
            data.total_failures += 1;
            match data.state {
                CircuitState::Closed => {
                    data.consecutive_failures += 1;
                    if data.consecutive_failures >= self.threshold {
                        data.state = CircuitState::Open;
                        data.opened_at = Some(now);
                        tracing::warn!(
                            provider,
                            failures = data.consecutive_failures,
                            "Circuit opened"
                        );
                    }
                }
                CircuitState::HalfOpen => {
                    // A failed probe re-opens and re-arms the cooldown.
                    data.state = CircuitState::Open;
                    data.opened_at = Some(now);
                    data.probe_in_flight = false;
                    tracing::warn!(provider, "Probe failed, circuit re-opened");
                }
                CircuitState::Open => {
                    // Stale failure from a call admitted before opening.
                }
            }
        });
    }

    /// Read-only state accessor.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.with_circuit(provider, |data| data.state)
    }

    pub fn snapshot(&self, provider: &str) -> CircuitSnapshot {
        self.with_circuit(provider, |data| CircuitSnapshot {
            state: data.state,
            consecutive_failures: data.consecutive_failures,
            seconds_since_opened: data.opened_at.map(|at| at.elapsed().as_secs_f64()),
            total_failures: data.total_failures,
            total_calls: data.total_calls,
        })
    }
}
