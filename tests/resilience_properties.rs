//! Property tests for the resilience primitives and the framing layer.

use mailwarden::breaker::{CircuitBreaker, CircuitState};
use mailwarden::cache::fingerprint;
use mailwarden::framing::{FrameReader, FrameWriter};
use mailwarden::limiter::TokenBucket;
use mailwarden::privacy::SanitizedInput;
use proptest::prelude::*;
use std::time::{Duration, Instant};

proptest! {
    #[test]
    fn bucket_admits_exactly_capacity(capacity in 1u32..50) {
        let mut bucket = TokenBucket::new(capacity, 10);
        let now = Instant::now();

        for i in 0..capacity {
            prop_assert!(
                bucket.try_acquire_at(now).is_admitted(),
                "request {} of {} should be admitted",
                i,
                capacity
            );
        }
        prop_assert!(!bucket.try_acquire_at(now).is_admitted());
    }

    #[test]
    fn breaker_opens_exactly_at_threshold(threshold in 1u32..10) {
        let breaker = CircuitBreaker::new(threshold, Duration::from_secs(30));
        let now = Instant::now();

        for i in 0..threshold - 1 {
            breaker.record_failure_at("p", now);
            prop_assert_eq!(
                breaker.state("p"),
                CircuitState::Closed,
                "closed after {} of {} failures",
                i + 1,
                threshold
            );
        }
        breaker.record_failure_at("p", now);
        prop_assert_eq!(breaker.state("p"), CircuitState::Open);
        prop_assert!(!breaker.try_acquire_at("p", now + Duration::from_secs(1)));
    }

    #[test]
    fn breaker_fast_fails_within_cooldown(
        threshold in 1u32..5,
        cooldown_ms in 1000u64..60_000,
        elapsed_fraction in 0.0f64..0.99,
    ) {
        let breaker = CircuitBreaker::new(threshold, Duration::from_millis(cooldown_ms));
        let now = Instant::now();
        for _ in 0..threshold {
            breaker.record_failure_at("p", now);
        }

        let within = now + Duration::from_millis((cooldown_ms as f64 * elapsed_fraction) as u64);
        prop_assert!(!breaker.try_acquire_at("p", within));
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_free(
        subject in ".{0,60}",
        sender in ".{0,40}",
        body in ".{0,200}",
        folders in proptest::collection::vec("[A-Za-z]{1,12}", 1..6),
    ) {
        let input = SanitizedInput {
            subject,
            sender,
            body,
            attachment_hints: vec![],
            detected_language: None,
        };
        let forward = fingerprint(&input, &folders, "ollama", "llama3", "v3");
        let again = fingerprint(&input, &folders, "ollama", "llama3", "v3");
        prop_assert_eq!(&forward, &again);

        let mut reversed = folders.clone();
        reversed.reverse();
        let backward = fingerprint(&input, &reversed, "ollama", "llama3", "v3");
        prop_assert_eq!(&forward, &backward);
    }

    #[test]
    fn frame_roundtrip_preserves_json(
        keys in proptest::collection::vec("[a-z_]{1,12}", 1..6),
        values in proptest::collection::vec(".{0,40}", 1..6),
    ) {
        let mut object = serde_json::Map::new();
        for (key, value) in keys.iter().zip(values.iter()) {
            object.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        let value = serde_json::Value::Object(object);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let read_back = runtime.block_on(async {
            let (read, write) = tokio::io::simplex(1024 * 1024);
            let mut writer = FrameWriter::new(write);
            writer.write_frame(&value).await.unwrap();
            let mut reader = FrameReader::new(read);
            reader.read_frame().await.unwrap()
        });

        prop_assert_eq!(read_back, value);
    }
}

#[test]
fn breaker_observable_via_read_only_accessor() {
    let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
    assert_eq!(breaker.state("p"), CircuitState::Closed);

    breaker.record_failure("p");
    breaker.record_failure("p");
    assert_eq!(breaker.state("p"), CircuitState::Open);

    let snapshot = breaker.snapshot("p");
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.consecutive_failures, 2);
    assert!(snapshot.seconds_since_opened.is_some());
}

#[test]
fn bucket_refills_over_time() {
    let mut bucket = TokenBucket::new(10, 600); // Ten per second.
    let now = Instant::now();
    for _ in 0..10 {
        assert!(bucket.try_acquire_at(now).is_admitted());
    }
    assert!(!bucket.try_acquire_at(now).is_admitted());

    // After ~200ms, two tokens are back.
    let later = now + Duration::from_millis(210);
    assert!(bucket.try_acquire_at(later).is_admitted());
    assert!(bucket.try_acquire_at(later).is_admitted());
    assert!(!bucket.try_acquire_at(later).is_admitted());
}
