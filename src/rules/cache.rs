use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::Rule;

/// Compiled rule set plus the time it was loaded.
///
/// The cache is a plain value. `RuleEngine` decides when to refresh it; a
/// refresh replaces the whole value, so concurrent refreshes are harmless
/// and the last one wins.
#[derive(Clone, Debug, Default)]
pub struct RuleCache {
    value: Arc<Vec<Rule>>,
    /// Seconds since the Unix epoch; `None` before the first load.
    last_refreshed: Option<f64>,
    fingerprint: [u8; 32],
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Arc<Vec<Rule>> {
        self.value.clone()
    }

    pub fn last_refreshed(&self) -> Option<f64> {
        self.last_refreshed
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    pub fn is_loaded(&self) -> bool {
        self.last_refreshed.is_some()
    }

    /// Stale when never loaded, when `ttl_s` has elapsed, or when the clock
    /// went backwards past the last refresh.
    pub fn is_stale(&self, now: f64, ttl_s: f64) -> bool {
        match self.last_refreshed {
            None => true,
            Some(at) => now < at || now - at >= ttl_s,
        }
    }

    /// Replace the cached rules. Returns true when the rule set changed.
    pub fn store(&mut self, rules: Vec<Rule>, now: f64) -> bool {
        let fingerprint = ruleset_fingerprint(&rules);
        let changed = !self.is_loaded() || fingerprint != self.fingerprint;
        self.value = Arc::new(rules);
        self.last_refreshed = Some(now);
        self.fingerprint = fingerprint;
        changed
    }

    /// Mark the current value fresh without reloading, e.g. after a failed
    /// refresh that keeps serving the previous set.
    pub fn touch(&mut self, now: f64) {
        if self.is_loaded() {
            self.last_refreshed = Some(now);
        }
    }
}

/// SHA-256 over the canonical JSON encoding of a rule set.
pub fn ruleset_fingerprint(rules: &[Rule]) -> [u8; 32] {
    // Rule contains only strings, numbers, bools and sorted sets.
    let canonical = serde_json::to_vec(rules).unwrap_or_default();
    Sha256::digest(&canonical).into()
}
