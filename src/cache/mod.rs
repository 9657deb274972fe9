//! Decision cache: fingerprint → decision memoization with TTL.
//!
//! LRU-bounded and TTL-expired. The fingerprint is computed over
//! sanitized inputs only and is deterministic across processes: request
//! ids, message ids and timestamps never participate, so identical
//! messages hit regardless of when or how they arrive.

use crate::orchestrator::types::{ClassificationDecision, RationaleTag};
use crate::privacy::SanitizedInput;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Field separator inside the fingerprint preimage.
const SEP: &[u8] = &[0x1f];

/// Deterministic cache key over the semantically significant parts of a
/// sanitized request.
pub fn fingerprint(
    input: &SanitizedInput,
    folders: &[String],
    provider_name: &str,
    model_id: &str,
    template_version: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.sender.trim().to_lowercase());
    hasher.update(SEP);
    hasher.update(input.subject.trim().to_lowercase());
    hasher.update(SEP);
    hasher.update(&input.body);
    hasher.update(SEP);

    // The folder list is a set for fingerprinting purposes.
    let mut sorted: Vec<&String> = folders.iter().collect();
    sorted.sort();
    for folder in sorted {
        hasher.update(folder.as_bytes());
        hasher.update(SEP);
    }

    hasher.update(provider_name.as_bytes());
    hasher.update(SEP);
    hasher.update(model_id.as_bytes());
    hasher.update(SEP);
    hasher.update(template_version.as_bytes());

    hex::encode(hasher.finalize())
}

/// What the cache stores: the decision minus signature and latency.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDecision {
    pub target_folder: String,
    pub confidence: f64,
    pub rationale_tag: RationaleTag,
    pub provider_name: String,
    pub model_name: String,
    pub hit_count: u32,
}

#[derive(Debug)]
struct Entry {
    decision: CachedDecision,
    expires_at: Instant,
}

/// Counters for the stats frame.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stores: u64,
    pub len: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

/// Thread-safe LRU + TTL cache keyed by fingerprint.
pub struct DecisionCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    stores: AtomicU64,
}

impl DecisionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity is at least 1"),
            )),
            ttl,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint, refreshing its LRU position on hit.
    pub fn get(&self, key: &str) -> Option<CachedDecision> {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        match cache.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.decision.hit_count += 1;
                let decision = entry.decision.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("mailwarden_cache_hits").increment(1);
                Some(decision)
            }
            Some(_) => {
                cache.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("mailwarden_cache_misses").increment(1);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("mailwarden_cache_misses").increment(1);
                None
            }
        }
    }

    /// Insert a decision. Fallback decisions are the caller's
    /// responsibility to filter; this only stores what it is given.
    pub fn insert(&self, key: String, decision: &ClassificationDecision) {
        let entry = Entry {
            decision: CachedDecision {
                target_folder: decision.target_folder.clone(),
                confidence: decision.confidence,
                rationale_tag: decision.rationale_tag,
                provider_name: decision.provider_name.clone(),
                model_name: decision.model_name.clone(),
                hit_count: 0,
            },
            expires_at: Instant::now() + self.ttl,
        };

        let mut cache = self.inner.lock().expect("cache lock poisoned");
        if let Some((evicted_key, _)) = cache.push(key.clone(), entry) {
            if evicted_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stores.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("mailwarden_cache_entries").set(cache.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}
