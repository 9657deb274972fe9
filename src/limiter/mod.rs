//! Token-bucket rate limiting for provider calls.
//!
//! One bucket per provider, the single admission point ahead of the
//! circuit breaker. A denied acquisition is reported with the wait until
//! the next token; it never counts as a breaker failure.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted,
    /// Denied; a token becomes available after this long.
    RetryAfter(Duration),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Classic token bucket with fractional refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_min: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_min as f64 / 60.0,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Admission check at an explicit time (deterministic in tests).
    pub fn try_acquire_at(&mut self, now: Instant) -> Admission {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Admission::Admitted
        } else {
            let deficit = 1.0 - self.tokens;
            Admission::RetryAfter(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }
}

/// Snapshot for the stats frame.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStatus {
    pub tokens: f64,
    pub capacity: u32,
    pub refill_per_min: u32,
}

/// Per-provider admission control.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
    capacity: u32,
    refill_per_min: u32,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_min: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_min,
        }
    }

    pub fn try_acquire(&self, provider: &str) -> Admission {
        self.try_acquire_at(provider, Instant::now())
    }

    pub fn try_acquire_at(&self, provider: &str, now: Instant) -> Admission {
        let bucket = self
            .buckets
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.capacity, self.refill_per_min)));
        let mut bucket = bucket.lock().expect("bucket lock poisoned");
        bucket.try_acquire_at(now)
    }

    pub fn status(&self, provider: &str) -> BucketStatus {
        let tokens = self
            .buckets
            .get(provider)
            .map(|bucket| bucket.lock().expect("bucket lock poisoned").available())
            .unwrap_or(self.capacity as f64);
        BucketStatus {
            tokens,
            capacity: self.capacity,
            refill_per_min: self.refill_per_min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bucket_admits_exactly_capacity() {
        let mut bucket = TokenBucket::new(10, 10);
        let now = Instant::now();

        for i in 0..10 {
            assert!(
                bucket.try_acquire_at(now).is_admitted(),
                "request {} should be admitted",
                i
            );
        }
        assert!(matches!(
            bucket.try_acquire_at(now),
            Admission::RetryAfter(_)
        ));
    }

    #[test]
    fn test_retry_after_reflects_refill_rate() {
        let mut bucket = TokenBucket::new(1, 60); // One token per second.
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now).is_admitted());
        match bucket.try_acquire_at(now) {
            Admission::RetryAfter(wait) => {
                assert!(wait <= Duration::from_secs(1));
                assert!(wait >= Duration::from_millis(900));
            }
            Admission::Admitted => panic!("bucket should be empty"),
        }
    }

    #[test]
    fn test_refill_restores_tokens() {
        let mut bucket = TokenBucket::new(2, 60); // One token per second.
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now).is_admitted());
        assert!(bucket.try_acquire_at(now).is_admitted());
        assert!(!bucket.try_acquire_at(now).is_admitted());

        // A hair over one second later, one token is back.
        let later = now + Duration::from_millis(1100);
        assert!(bucket.try_acquire_at(later).is_admitted());
        assert!(!bucket.try_acquire_at(later).is_admitted());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(3, 60);
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now).is_admitted());
        // A long idle period refills to capacity, not beyond.
        let later = now + Duration::from_secs(3600);
        for _ in 0..3 {
            assert!(bucket.try_acquire_at(later).is_admitted());
        }
        assert!(!bucket.try_acquire_at(later).is_admitted());
    }

    #[test]
    fn test_limiter_buckets_are_per_provider() {
        let limiter = RateLimiter::new(1, 10);
        let now = Instant::now();

        assert!(limiter.try_acquire_at("ollama", now).is_admitted());
        assert!(!limiter.try_acquire_at("ollama", now).is_admitted());
        // A different provider has its own bucket.
        assert!(limiter.try_acquire_at("openai", now).is_admitted());
    }

    #[test]
    fn test_status_reports_remaining_tokens() {
        let limiter = RateLimiter::new(5, 10);
        let now = Instant::now();
        limiter.try_acquire_at("ollama", now);
        limiter.try_acquire_at("ollama", now);

        let status = limiter.status("ollama");
        assert_eq!(status.capacity, 5);
        assert!(status.tokens <= 3.0 + f64::EPSILON);
    }

    #[test]
    fn test_status_for_untouched_provider() {
        let limiter = RateLimiter::new(5, 10);
        let status = limiter.status("gemini");
        assert_eq!(status.tokens, 5.0);
    }
}
