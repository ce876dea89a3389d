use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use super::cache::RuleCache;
use super::source::{RuleSource, StaticRuleSource};
use super::{
    compile_rules, EvaluationContext, Rule, RuleKind, RuleMatch, RuleRecord,
    HISTORY_ONLY_CONFIDENCE,
};
use crate::detect::Detection;

pub const DEFAULT_RULE_TTL_SECS: f64 = 60.0;

/// Evaluates active rules against a detection batch.
///
/// Rules are pulled from a `RuleSource` and cached for `ttl_s`. The engine
/// holds no per-session state and is shared across sessions behind an `Arc`.
pub struct RuleEngine {
    source: Box<dyn RuleSource>,
    cache: RwLock<RuleCache>,
    ttl_s: f64,
}

impl RuleEngine {
    pub fn new(source: Box<dyn RuleSource>, ttl_s: f64) -> Self {
        let ttl_s = if ttl_s.is_finite() && ttl_s >= 0.0 {
            ttl_s
        } else {
            DEFAULT_RULE_TTL_SECS
        };
        Self {
            source,
            cache: RwLock::new(RuleCache::new()),
            ttl_s,
        }
    }

    /// Engine over a fixed rule list.
    pub fn with_records(records: Vec<RuleRecord>) -> Self {
        Self::new(
            Box::new(StaticRuleSource::new(records)),
            DEFAULT_RULE_TTL_SECS,
        )
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn ttl_s(&self) -> f64 {
        self.ttl_s
    }

    /// Reload from the source now, regardless of TTL.
    ///
    /// On source failure the previous rule set keeps being served (and its
    /// TTL restarts) if one exists; otherwise the error is returned.
    pub fn refresh(&self, now: f64) -> Result<Arc<Vec<Rule>>> {
        // Load outside the lock; a racing refresh just overwrites.
        let loaded = self.source.load_rules();
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("rule cache lock poisoned"))?;
        match loaded {
            Ok(records) => {
                let rules = compile_rules(&records);
                let count = rules.len();
                if cache.store(rules, now) {
                    log::info!(
                        "loaded {} rules from {} source (fingerprint {})",
                        count,
                        self.source.name(),
                        hex::encode(&cache.fingerprint()[..8])
                    );
                }
                Ok(cache.value())
            }
            Err(err) if cache.is_loaded() => {
                log::warn!(
                    "rule refresh from {} failed, serving cached set: {}",
                    self.source.name(),
                    err
                );
                cache.touch(now);
                Ok(cache.value())
            }
            Err(err) => Err(err),
        }
    }

    /// Current rule set, refreshing first if the cache has expired.
    pub fn rules(&self, now: f64) -> Result<Arc<Vec<Rule>>> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| anyhow!("rule cache lock poisoned"))?;
            if !cache.is_stale(now, self.ttl_s) {
                return Ok(cache.value());
            }
        }
        self.refresh(now)
    }

    pub fn cache_snapshot(&self) -> Result<RuleCache> {
        let cache = self
            .cache
            .read()
            .map_err(|_| anyhow!("rule cache lock poisoned"))?;
        Ok(cache.clone())
    }

    /// Evaluate every active rule independently against `detections`.
    ///
    /// An empty batch short-circuits to no matches without touching the
    /// rule source.
    pub fn evaluate(
        &self,
        detections: &[Detection],
        ctx: &EvaluationContext,
    ) -> Result<Vec<RuleMatch>> {
        if detections.is_empty() {
            return Ok(Vec::new());
        }
        let rules = self.rules(ctx.current_time)?;
        let matches: Vec<RuleMatch> = rules
            .iter()
            .filter(|rule| rule.active)
            .filter_map(|rule| evaluate_rule(rule, detections, ctx))
            .collect();
        if !matches.is_empty() {
            log::debug!(
                "session {}: {} of {} rules matched",
                ctx.session_id,
                matches.len(),
                rules.len()
            );
        }
        Ok(matches)
    }
}

/// Evaluate one rule. Pure; `None` when the rule does not fire.
pub fn evaluate_rule(
    rule: &Rule,
    detections: &[Detection],
    ctx: &EvaluationContext,
) -> Option<RuleMatch> {
    match &rule.kind {
        RuleKind::Frequency {
            behavior,
            threshold,
            window_s,
            min_confidence,
        } => eval_frequency(
            rule,
            behavior,
            *threshold,
            *window_s,
            *min_confidence,
            detections,
            ctx,
        ),
        RuleKind::Threshold {
            behavior,
            threshold,
            min_confidence,
        } => eval_threshold(rule, behavior, *threshold, *min_confidence, detections),
        RuleKind::Combination {
            behaviors,
            min_confidence,
        } => eval_combination(rule, behaviors, *min_confidence, detections),
        RuleKind::Duration {
            behavior,
            duration_s,
            min_confidence,
        } => eval_duration(rule, behavior, *duration_s, *min_confidence, detections, ctx),
    }
}

fn qualifying_confidences(
    detections: &[Detection],
    behavior: &str,
    min_confidence: f32,
) -> Vec<f32> {
    detections
        .iter()
        .filter(|d| d.qualifies(behavior, min_confidence))
        .map(|d| d.confidence)
        .collect()
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f32>() / values.len() as f32)
}

fn base_match(
    rule: &Rule,
    matched_count: u32,
    threshold: f64,
    confidence: f32,
    message: String,
) -> RuleMatch {
    RuleMatch {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        rule_type: rule.rule_type(),
        alert_level: rule.alert_level,
        behavior: rule.kind.behavior_label(),
        behaviors: rule.kind.behaviors().into_iter().map(str::to_string).collect(),
        matched_count,
        threshold,
        confidence,
        message,
    }
}

fn eval_frequency(
    rule: &Rule,
    behavior: &str,
    threshold: u32,
    window_s: f64,
    min_confidence: f32,
    detections: &[Detection],
    ctx: &EvaluationContext,
) -> Option<RuleMatch> {
    let confidences = qualifying_confidences(detections, behavior, min_confidence);
    let batch = confidences.len() as u32;
    let total = batch.saturating_add(ctx.historical_count(behavior));
    if total < threshold {
        return None;
    }
    let confidence = mean(&confidences).unwrap_or(HISTORY_ONLY_CONFIDENCE);
    Some(base_match(
        rule,
        total,
        threshold as f64,
        confidence,
        format!(
            "{}: {} observed {} times within {:.0}s (threshold {})",
            rule.name, behavior, total, window_s, threshold
        ),
    ))
}

fn eval_threshold(
    rule: &Rule,
    behavior: &str,
    threshold: u32,
    min_confidence: f32,
    detections: &[Detection],
) -> Option<RuleMatch> {
    let confidences = qualifying_confidences(detections, behavior, min_confidence);
    let count = confidences.len() as u32;
    if count == 0 || count < threshold {
        return None;
    }
    Some(base_match(
        rule,
        count,
        threshold as f64,
        mean(&confidences).unwrap_or_default(),
        format!(
            "{}: {} students showing {} (threshold {})",
            rule.name, count, behavior, threshold
        ),
    ))
}

fn eval_combination(
    rule: &Rule,
    behaviors: &BTreeSet<String>,
    min_confidence: f32,
    detections: &[Detection],
) -> Option<RuleMatch> {
    let qualifying: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.confidence >= min_confidence && behaviors.contains(&d.class_name))
        .collect();
    let observed: BTreeSet<&str> = qualifying.iter().map(|d| d.class_name.as_str()).collect();
    if !behaviors.iter().all(|b| observed.contains(b.as_str())) {
        return None;
    }
    let confidences: Vec<f32> = qualifying.iter().map(|d| d.confidence).collect();
    let required = behaviors.len() as u32;
    Some(base_match(
        rule,
        required,
        required as f64,
        mean(&confidences).unwrap_or_default(),
        format!(
            "{}: behaviors {} observed together",
            rule.name,
            rule.kind.behavior_label()
        ),
    ))
}

fn eval_duration(
    rule: &Rule,
    behavior: &str,
    duration_s: f64,
    min_confidence: f32,
    detections: &[Detection],
    ctx: &EvaluationContext,
) -> Option<RuleMatch> {
    let current = detections
        .iter()
        .find(|d| d.qualifies(behavior, min_confidence))?;
    let held = ctx.duration(behavior);
    if held < duration_s {
        return None;
    }
    Some(base_match(
        rule,
        held.max(0.0).floor().min(u32::MAX as f64) as u32,
        duration_s,
        current.confidence,
        format!(
            "{}: {} sustained for {:.0}s (limit {:.0}s)",
            rule.name, behavior, held, duration_s
        ),
    ))
}
