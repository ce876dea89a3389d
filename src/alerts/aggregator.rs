use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::classify::{classify_alert_level, BehaviorCategories};
use super::suggestions::SuggestionBook;
use super::{Alert, AGGREGATED_ALERT_TYPE, MODEL_ALERT_TYPE};
use crate::detect::Detection;
use crate::geometry::BBox;
use crate::rules::{EvaluationContext, RuleEngine, RuleMatch};
use crate::{round3, AlertLevel};

/// Upper bound on suggestions carried by a merged alert.
pub const MAX_MERGED_SUGGESTIONS: usize = 5;

/// Turns rule matches into alerts.
///
/// Merging only happens between alerts produced by the same
/// `generate_alerts` call; nothing is carried between calls except the id
/// counter.
pub struct AlertAggregator {
    engine: Arc<RuleEngine>,
    suggestions: SuggestionBook,
    categories: BehaviorCategories,
    next_alert_id: AtomicU64,
}

impl AlertAggregator {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self {
            engine,
            suggestions: SuggestionBook::default(),
            categories: BehaviorCategories::default(),
            next_alert_id: AtomicU64::new(1),
        }
    }

    pub fn with_suggestions(mut self, suggestions: SuggestionBook) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_categories(mut self, categories: BehaviorCategories) -> Self {
        self.categories = categories;
        self
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn categories(&self) -> &BehaviorCategories {
        &self.categories
    }

    fn next_id(&self) -> u64 {
        self.next_alert_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Evaluate rules for one batch and return merged alerts.
    pub fn generate_alerts(
        &self,
        detections: &[Detection],
        session_id: &str,
        ctx: &EvaluationContext,
    ) -> Result<Vec<Alert>> {
        let matches = self.engine.evaluate(detections, ctx)?;
        if matches.is_empty() {
            return Ok(Vec::new());
        }
        let alerts: Vec<Alert> = matches
            .iter()
            .map(|m| self.alert_from_match(m, detections, session_id, ctx.current_time))
            .collect();
        let mut merged = merge_alerts(alerts);
        for alert in &mut merged {
            alert.alert_id = self.next_id();
        }
        for alert in &merged {
            log::info!(
                "session {}: alert {} level {} behavior {} rules {:?}",
                alert.session_id,
                alert.alert_id,
                alert.alert_level.as_u8(),
                alert.behavior,
                alert.triggered_rules
            );
        }
        Ok(merged)
    }

    /// Build an unmerged alert for one match. `alert_id` is left at 0.
    pub fn alert_from_match(
        &self,
        m: &RuleMatch,
        detections: &[Detection],
        session_id: &str,
        created_at: f64,
    ) -> Alert {
        let location_info: Vec<BBox> = detections
            .iter()
            .filter(|d| m.behaviors.iter().any(|b| b == &d.class_name))
            .map(|d| d.bbox)
            .collect();
        Alert {
            alert_id: 0,
            session_id: session_id.to_string(),
            alert_level: m.alert_level,
            alert_type: m.rule_type.as_str().to_string(),
            behavior: m.behavior.clone(),
            behavior_count: m.matched_count,
            confidence: m.confidence,
            location_info,
            triggered_rules: BTreeSet::from([m.rule_id]),
            suggestions: self.suggestions.for_alert(&m.behavior, m.alert_level),
            created_at,
            is_read: false,
        }
    }

    pub fn classify(&self, behavior: &str, count: u32, confidence: f32) -> AlertLevel {
        classify_alert_level(&self.categories, behavior, count, confidence)
    }

    /// Alert for an occurrence reported directly by the model, graded by
    /// behavior category instead of a rule.
    pub fn alert_from_model(
        &self,
        session_id: &str,
        behavior: &str,
        count: u32,
        confidence: f32,
        location_info: Vec<BBox>,
        created_at: f64,
    ) -> Alert {
        let alert_level = self.classify(behavior, count, confidence);
        Alert {
            alert_id: self.next_id(),
            session_id: session_id.to_string(),
            alert_level,
            alert_type: MODEL_ALERT_TYPE.to_string(),
            behavior: behavior.to_string(),
            behavior_count: count,
            confidence: round3(confidence),
            location_info,
            triggered_rules: BTreeSet::new(),
            suggestions: self.suggestions.for_alert(behavior, alert_level),
            created_at,
            is_read: false,
        }
    }
}

/// Merge alerts sharing a behavior. Groups keep first-appearance order;
/// single-member groups pass through untouched.
pub fn merge_alerts(alerts: Vec<Alert>) -> Vec<Alert> {
    let mut groups: Vec<(String, Vec<Alert>)> = Vec::new();
    for alert in alerts {
        match groups.iter_mut().find(|(behavior, _)| behavior == &alert.behavior) {
            Some((_, members)) => members.push(alert),
            None => groups.push((alert.behavior.clone(), vec![alert])),
        }
    }
    groups
        .into_iter()
        .filter_map(|(_, members)| merge_group(members))
        .collect()
}

fn merge_group(mut members: Vec<Alert>) -> Option<Alert> {
    if members.len() <= 1 {
        return members.pop();
    }
    let n = members.len() as f32;
    let mut iter = members.into_iter();
    let mut merged = iter.next()?;
    let mut confidence_sum = merged.confidence;
    let mut seen: Vec<String> = Vec::new();
    for s in merged.suggestions.drain(..) {
        if !seen.contains(&s) {
            seen.push(s);
        }
    }

    for alert in iter {
        merged.alert_level = merged.alert_level.max(alert.alert_level);
        merged.triggered_rules.extend(alert.triggered_rules);
        merged.location_info.extend(alert.location_info);
        for s in alert.suggestions {
            if !seen.contains(&s) {
                seen.push(s);
            }
        }
        confidence_sum += alert.confidence;
        merged.behavior_count = merged.behavior_count.saturating_add(alert.behavior_count);
        merged.created_at = merged.created_at.min(alert.created_at);
        if merged.alert_type != alert.alert_type {
            merged.alert_type = AGGREGATED_ALERT_TYPE.to_string();
        }
    }

    seen.truncate(MAX_MERGED_SUGGESTIONS);
    merged.suggestions = seen;
    merged.confidence = round3(confidence_sum / n);
    Some(merged)
}
