//! Confidence thresholds and calibration.
//!
//! The threshold policy is the acceptance rule: a decision stands only if
//! its confidence reaches the target folder's threshold. The calibrator
//! keeps rolling per-(folder, provider) windows of outcomes and proposes
//! adjustments inside a bounded corridor. Proposals are advisory; the
//! configured value always governs decisions.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Threshold applied when a folder has no explicit entry and the config
/// map carries no `default` key.
pub const DEFAULT_THRESHOLD: f64 = 0.55;

/// Advisory adjustments never leave ±0.10 around the configured value.
pub const CORRIDOR: f64 = 0.10;

/// Rolling window length per (folder, provider).
const WINDOW: usize = 100;

/// Proposals need at least this many samples.
const MIN_SAMPLES: usize = 20;

/// Per-folder confidence thresholds with a default fallback.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    thresholds: HashMap<String, f64>,
    default: f64,
}

impl ThresholdPolicy {
    /// Build from the config map; the `default` key becomes the fallback.
    pub fn from_map(map: &HashMap<String, f64>) -> Self {
        let default = map.get("default").copied().unwrap_or(DEFAULT_THRESHOLD);
        let thresholds = map
            .iter()
            .filter(|(folder, _)| folder.as_str() != "default")
            .map(|(folder, threshold)| (folder.clone(), *threshold))
            .collect();
        Self {
            thresholds,
            default,
        }
    }

    pub fn threshold(&self, folder: &str) -> f64 {
        self.thresholds.get(folder).copied().unwrap_or(self.default)
    }

    pub fn passes(&self, folder: &str, confidence: f64) -> bool {
        confidence >= self.threshold(folder)
    }
}

/// One observed outcome for a (folder, provider) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Decision passed the threshold and was emitted.
    Accepted,
    /// Confidence fell below the threshold.
    Rejected,
    /// The user moved the message elsewhere afterwards.
    Overridden,
}

#[derive(Debug, Default)]
struct Window {
    outcomes: VecDeque<Outcome>,
}

impl Window {
    fn record(&mut self, outcome: Outcome) {
        if self.outcomes.len() == WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|&&o| o == outcome).count()
    }
}

/// Per-(folder, provider) calibration summary for the stats frame.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationStat {
    pub folder: String,
    pub provider: String,
    pub samples: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub overridden: usize,
    pub configured_threshold: f64,
    pub proposed_threshold: f64,
}

/// Rolling-window calibrator.
pub struct ConfidenceCalibrator {
    policy: ThresholdPolicy,
    windows: DashMap<(String, String), Mutex<Window>>,
}

impl ConfidenceCalibrator {
    pub fn new(policy: ThresholdPolicy) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// The threshold that governs decisions: always the configured one.
    pub fn threshold(&self, folder: &str) -> f64 {
        self.policy.threshold(folder)
    }

    pub fn passes(&self, folder: &str, confidence: f64) -> bool {
        self.policy.passes(folder, confidence)
    }

    pub fn record(&self, folder: &str, provider: &str, outcome: Outcome) {
        let key = (folder.to_string(), provider.to_string());
        let window = self.windows.entry(key).or_default();
        window.lock().expect("calibration lock poisoned").record(outcome);
    }

    /// Advisory threshold proposal inside the corridor. With too few
    /// samples the configured value is returned unchanged.
    pub fn proposed_threshold(&self, folder: &str, provider: &str) -> f64 {
        let configured = self.policy.threshold(folder);
        let key = (folder.to_string(), provider.to_string());
        let Some(window) = self.windows.get(&key) else {
            return configured;
        };
        let window = window.lock().expect("calibration lock poisoned");

        let accepted = window.count(Outcome::Accepted);
        let overridden = window.count(Outcome::Overridden);
        let decided = accepted + overridden;
        if decided < MIN_SAMPLES {
            return configured;
        }

        // A healthy override ratio is ~5%. More overrides push the
        // threshold up, fewer let it relax, capped by the corridor.
        let override_ratio = overridden as f64 / decided as f64;
        let shift = ((override_ratio - 0.05) * 2.0).clamp(-1.0, 1.0) * CORRIDOR;
        (configured + shift).clamp(0.0, 1.0)
    }

    pub fn stats(&self) -> Vec<CalibrationStat> {
        // Collect keys first so no shard guard is held while re-entering
        // the map below.
        let mut keys: Vec<(String, String)> =
            self.windows.iter().map(|item| item.key().clone()).collect();
        keys.sort();

        keys.into_iter()
            .map(|(folder, provider)| {
                let (accepted, rejected, overridden) = self
                    .windows
                    .get(&(folder.clone(), provider.clone()))
                    .map(|window| {
                        let window = window.lock().expect("calibration lock poisoned");
                        (
                            window.count(Outcome::Accepted),
                            window.count(Outcome::Rejected),
                            window.count(Outcome::Overridden),
                        )
                    })
                    .unwrap_or((0, 0, 0));
                let configured = self.policy.threshold(&folder);
                let proposed = self.proposed_threshold(&folder, &provider);
                CalibrationStat {
                    samples: accepted + rejected + overridden,
                    accepted,
                    rejected,
                    overridden,
                    configured_threshold: configured,
                    proposed_threshold: proposed,
                    folder,
                    provider,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ThresholdPolicy {
        let mut map = HashMap::new();
        map.insert("default".to_string(), 0.55);
        map.insert("Invoices".to_string(), 0.85);
        map.insert("Trash".to_string(), 0.9);
        ThresholdPolicy::from_map(&map)
    }

    #[test]
    fn test_threshold_lookup_with_default() {
        let policy = policy();
        assert_eq!(policy.threshold("Invoices"), 0.85);
        assert_eq!(policy.threshold("Trash"), 0.9);
        assert_eq!(policy.threshold("Unknown"), 0.55);
    }

    #[test]
    fn test_default_key_not_a_folder() {
        let policy = policy();
        // "default" itself resolves through the fallback path.
        assert_eq!(policy.threshold("default"), 0.55);
    }

    #[test]
    fn test_missing_default_key_uses_constant() {
        let policy = ThresholdPolicy::from_map(&HashMap::new());
        assert_eq!(policy.threshold("Anything"), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_passes_at_exact_threshold() {
        let policy = policy();
        assert!(policy.passes("Invoices", 0.85));
        assert!(!policy.passes("Invoices", 0.8499));
    }

    #[test]
    fn test_calibrator_uses_configured_threshold() {
        let calibrator = ConfidenceCalibrator::new(policy());
        assert_eq!(calibrator.threshold("Invoices"), 0.85);
        assert!(calibrator.passes("Invoices", 0.91));
        assert!(!calibrator.passes("Invoices", 0.7));
    }

    #[test]
    fn test_proposal_unchanged_below_min_samples() {
        let calibrator = ConfidenceCalibrator::new(policy());
        for _ in 0..5 {
            calibrator.record("Invoices", "ollama", Outcome::Accepted);
        }
        assert_eq!(calibrator.proposed_threshold("Invoices", "ollama"), 0.85);
    }

    #[test]
    fn test_heavy_overrides_raise_proposal_within_corridor() {
        let calibrator = ConfidenceCalibrator::new(policy());
        for _ in 0..20 {
            calibrator.record("Invoices", "ollama", Outcome::Accepted);
        }
        for _ in 0..20 {
            calibrator.record("Invoices", "ollama", Outcome::Overridden);
        }

        let proposed = calibrator.proposed_threshold("Invoices", "ollama");
        assert!(proposed > 0.85);
        assert!(proposed <= 0.85 + CORRIDOR + 1e-9);
    }

    #[test]
    fn test_clean_record_relaxes_proposal_within_corridor() {
        let calibrator = ConfidenceCalibrator::new(policy());
        for _ in 0..50 {
            calibrator.record("Invoices", "ollama", Outcome::Accepted);
        }

        let proposed = calibrator.proposed_threshold("Invoices", "ollama");
        assert!(proposed < 0.85);
        assert!(proposed >= 0.85 - CORRIDOR - 1e-9);
    }

    #[test]
    fn test_proposal_clamped_to_unit_interval() {
        let mut map = HashMap::new();
        map.insert("Trash".to_string(), 0.98);
        let calibrator = ConfidenceCalibrator::new(ThresholdPolicy::from_map(&map));
        for _ in 0..40 {
            calibrator.record("Trash", "ollama", Outcome::Overridden);
        }
        assert!(calibrator.proposed_threshold("Trash", "ollama") <= 1.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let calibrator = ConfidenceCalibrator::new(policy());
        for _ in 0..500 {
            calibrator.record("Invoices", "ollama", Outcome::Accepted);
        }
        let stats = calibrator.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].samples, 100);
    }

    #[test]
    fn test_stats_per_folder_provider_pair() {
        let calibrator = ConfidenceCalibrator::new(policy());
        calibrator.record("Invoices", "ollama", Outcome::Accepted);
        calibrator.record("Invoices", "openai", Outcome::Rejected);
        calibrator.record("Trash", "ollama", Outcome::Overridden);

        let stats = calibrator.stats();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].folder, "Invoices");
        assert_eq!(stats[0].provider, "ollama");
        assert_eq!(stats[0].accepted, 1);
        assert_eq!(stats[2].overridden, 1);
    }
}
