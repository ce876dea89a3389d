//! Behavior rules.
//!
//! Rules arrive from an external store as loosely-typed `RuleRecord`s and are
//! compiled into the closed `RuleKind` sum type at load time. Clamping and
//! unknown-type filtering happen once, there; evaluation never sees an
//! invalid rule.

mod cache;
mod engine;
mod source;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::AlertLevel;

pub use cache::{ruleset_fingerprint, RuleCache};
pub use engine::{evaluate_rule, RuleEngine, DEFAULT_RULE_TTL_SECS};
pub use source::{default_rules, FileRuleSource, RuleSource, SqliteRuleSource, StaticRuleSource};

pub const DEFAULT_TIME_WINDOW_SECS: f64 = 60.0;
/// Confidence reported by a frequency match made entirely of history.
pub const HISTORY_ONLY_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Frequency,
    Threshold,
    Combination,
    Duration,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Frequency => "frequency",
            RuleType::Threshold => "threshold",
            RuleType::Combination => "combination",
            RuleType::Duration => "duration",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "frequency" => Some(RuleType::Frequency),
            "threshold" => Some(RuleType::Threshold),
            "combination" => Some(RuleType::Combination),
            "duration" => Some(RuleType::Duration),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleKind {
    /// Batch + historical count of `behavior` reaches `threshold` within
    /// `window_s`.
    Frequency {
        behavior: String,
        threshold: u32,
        window_s: f64,
        min_confidence: f32,
    },
    /// Batch-only count of `behavior` reaches `threshold`.
    Threshold {
        behavior: String,
        threshold: u32,
        min_confidence: f32,
    },
    /// Every behavior in `behaviors` present in the batch.
    Combination {
        behaviors: BTreeSet<String>,
        min_confidence: f32,
    },
    /// `behavior` present now and held for at least `duration_s`.
    Duration {
        behavior: String,
        duration_s: f64,
        min_confidence: f32,
    },
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleKind::Frequency { .. } => RuleType::Frequency,
            RuleKind::Threshold { .. } => RuleType::Threshold,
            RuleKind::Combination { .. } => RuleType::Combination,
            RuleKind::Duration { .. } => RuleType::Duration,
        }
    }

    /// Behaviors the rule looks at, sorted.
    pub fn behaviors(&self) -> Vec<&str> {
        match self {
            RuleKind::Frequency { behavior, .. }
            | RuleKind::Threshold { behavior, .. }
            | RuleKind::Duration { behavior, .. } => vec![behavior.as_str()],
            RuleKind::Combination { behaviors, .. } => {
                behaviors.iter().map(String::as_str).collect()
            }
        }
    }

    /// Label used to group alerts: the behavior, or `a+b` for combinations.
    pub fn behavior_label(&self) -> String {
        self.behaviors().join("+")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub alert_level: AlertLevel,
    pub active: bool,
    pub kind: RuleKind,
}

impl Rule {
    pub fn rule_type(&self) -> RuleType {
        self.kind.rule_type()
    }

    /// Compile a stored record. Returns `None` for records that cannot be
    /// evaluated (unknown type, no target behavior); numeric fields are
    /// clamped instead of rejected.
    pub fn from_record(record: &RuleRecord) -> Option<Rule> {
        let Some(rule_type) = RuleType::parse(&record.rule_type) else {
            log::warn!(
                "rule {} ({}) has unknown type {:?}; skipped",
                record.id,
                record.name,
                record.rule_type
            );
            return None;
        };

        let min_confidence = clamp_confidence(record.min_confidence);
        let kind = match rule_type {
            RuleType::Frequency => RuleKind::Frequency {
                behavior: record.target_behavior()?,
                threshold: clamp_threshold(record.threshold),
                window_s: clamp_seconds(record.time_window, DEFAULT_TIME_WINDOW_SECS),
                min_confidence,
            },
            RuleType::Threshold => RuleKind::Threshold {
                behavior: record.target_behavior()?,
                threshold: clamp_threshold(record.threshold),
                min_confidence,
            },
            RuleType::Combination => {
                let behaviors: BTreeSet<String> = record
                    .behaviors
                    .iter()
                    .chain(record.behavior.iter())
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect();
                if behaviors.is_empty() {
                    log::warn!(
                        "combination rule {} ({}) names no behaviors; skipped",
                        record.id,
                        record.name
                    );
                    return None;
                }
                RuleKind::Combination {
                    behaviors,
                    min_confidence,
                }
            }
            RuleType::Duration => RuleKind::Duration {
                behavior: record.target_behavior()?,
                duration_s: clamp_seconds(record.duration_seconds, 0.0),
                min_confidence,
            },
        };

        Some(Rule {
            id: record.id,
            name: record.name.clone(),
            alert_level: AlertLevel::clamped(record.alert_level.unwrap_or(1)),
            active: record.is_active,
            kind,
        })
    }
}

/// Compile records, dropping the ones `Rule::from_record` rejects.
pub fn compile_rules(records: &[RuleRecord]) -> Vec<Rule> {
    records.iter().filter_map(Rule::from_record).collect()
}

fn clamp_threshold(value: Option<i64>) -> u32 {
    match value {
        Some(v) if v >= 1 => u32::try_from(v).unwrap_or(u32::MAX),
        _ => 1,
    }
}

fn clamp_seconds(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.max(0.0),
        _ => default,
    }
}

fn clamp_confidence(value: Option<f64>) -> f32 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0) as f32,
        _ => 0.0,
    }
}

fn default_active() -> bool {
    true
}

/// Rule as stored by the configuration collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: i64,
    pub name: String,
    pub rule_type: String,
    #[serde(default)]
    pub behavior: Option<String>,
    #[serde(default)]
    pub behaviors: Vec<String>,
    #[serde(default)]
    pub threshold: Option<i64>,
    /// Seconds.
    #[serde(default)]
    pub time_window: Option<f64>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub alert_level: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Default for RuleRecord {
    /// Matches the serde defaults: a record is active unless it says otherwise.
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            rule_type: String::new(),
            behavior: None,
            behaviors: Vec::new(),
            threshold: None,
            time_window: None,
            min_confidence: None,
            duration_seconds: None,
            alert_level: None,
            is_active: default_active(),
        }
    }
}

impl RuleRecord {
    fn target_behavior(&self) -> Option<String> {
        let behavior = self
            .behavior
            .as_deref()
            .or_else(|| self.behaviors.first().map(String::as_str))
            .map(str::trim)
            .filter(|b| !b.is_empty());
        if behavior.is_none() {
            log::warn!(
                "{} rule {} ({}) names no target behavior; skipped",
                self.rule_type,
                self.id,
                self.name
            );
        }
        behavior.map(str::to_string)
    }
}

/// Per-call evaluation inputs beyond the detection batch.
#[derive(Clone, Debug, Default)]
pub struct EvaluationContext {
    pub session_id: String,
    /// Seconds since the Unix epoch.
    pub current_time: f64,
    /// Prior occurrences per behavior, already restricted by the caller to
    /// the relevant rule window.
    pub historical_counts: HashMap<String, u32>,
    /// Cumulative seconds each behavior has been held.
    pub behavior_durations: HashMap<String, f64>,
}

impl EvaluationContext {
    pub fn new(session_id: &str, current_time: f64) -> Self {
        Self {
            session_id: session_id.to_string(),
            current_time,
            ..Self::default()
        }
    }

    pub fn with_history(mut self, behavior: &str, count: u32) -> Self {
        self.historical_counts.insert(behavior.to_string(), count);
        self
    }

    pub fn with_duration(mut self, behavior: &str, seconds: f64) -> Self {
        self.behavior_durations.insert(behavior.to_string(), seconds);
        self
    }

    pub fn historical_count(&self, behavior: &str) -> u32 {
        self.historical_counts.get(behavior).copied().unwrap_or(0)
    }

    pub fn duration(&self, behavior: &str) -> f64 {
        self.behavior_durations.get(behavior).copied().unwrap_or(0.0)
    }
}

/// One rule firing against one batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleMatch {
    pub rule_id: i64,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub alert_level: AlertLevel,
    /// Grouping label; `a+b` for combinations.
    pub behavior: String,
    /// Individual behaviors the rule targets.
    pub behaviors: Vec<String>,
    /// Detections counted, or whole seconds held for duration rules.
    pub matched_count: u32,
    /// Count threshold, or seconds for duration rules.
    pub threshold: f64,
    pub confidence: f32,
    pub message: String,
}
