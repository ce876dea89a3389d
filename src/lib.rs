//! Classroom Sentinel
//!
//! This crate implements the real-time behavior-alert kernel of a classroom
//! video-analytics deployment. It turns per-frame detections from an external
//! model into deduplicated, severity-ranked alerts.
//!
//! # Architecture
//!
//! Data flows through five stages:
//!
//! 1. **Box overlap** (`geometry`): IoU between axis-aligned boxes.
//! 2. **Position tracking** (`tracker`): persistent track ids across frames.
//! 3. **Deduplication** (`dedup`): per-track behavior state with cooldowns.
//! 4. **Rule evaluation** (`rules`): frequency, threshold, combination and
//!    duration rules against the raw batch plus historical context.
//! 5. **Alert aggregation** (`alerts`): rule matches to alerts, merged per
//!    behavior within one evaluation call.
//!
//! Tracking/dedup and rule evaluation run over the same raw batch in
//! parallel; `session::DetectionSession` wires both paths for one session.
//!
//! # Ownership
//!
//! Tracker and dedup state are session-scoped and single-writer. The rule
//! engine is `Send + Sync` and is shared read-mostly across sessions.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod alerts;
pub mod config;
pub mod dedup;
pub mod detect;
pub mod geometry;
pub mod rules;
pub mod session;
pub mod tracker;

pub use alerts::{
    classify_alert_level, Alert, AlertAggregator, AlertSink, BehaviorCategories, BehaviorCategory,
    InMemoryAlertSink, JsonLinesSink, SuggestionBook,
};
pub use dedup::{BehaviorState, DedupConfig, DedupStats, DeduplicationEngine, RecordReason};
pub use detect::{BehaviorKind, Detection, DetectionSource, ScriptedSource};
pub use geometry::{iou, BBox};
pub use rules::{
    EvaluationContext, FileRuleSource, Rule, RuleEngine, RuleKind, RuleMatch, RuleRecord,
    RuleSource, RuleType, SqliteRuleSource, StaticRuleSource,
};
pub use session::{DetectionSession, FrameReport, TrackedDetection};
pub use tracker::{PositionTracker, Track, TrackId, TrackerConfig};

// -------------------- Alert Levels --------------------

/// Ordinal alert severity, 0 (normal) through 3 (severe).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum AlertLevel {
    #[default]
    Normal = 0,
    Mild = 1,
    Moderate = 2,
    Severe = 3,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Normal,
        AlertLevel::Mild,
        AlertLevel::Moderate,
        AlertLevel::Severe,
    ];

    /// Saturating conversion: negatives become `Normal`, anything above 3
    /// becomes `Severe`.
    pub fn clamped(value: i64) -> Self {
        match value {
            i64::MIN..=0 => AlertLevel::Normal,
            1 => AlertLevel::Mild,
            2 => AlertLevel::Moderate,
            _ => AlertLevel::Severe,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Mild => "mild",
            AlertLevel::Moderate => "moderate",
            AlertLevel::Severe => "severe",
        }
    }
}

impl From<AlertLevel> for u8 {
    fn from(level: AlertLevel) -> Self {
        level.as_u8()
    }
}

impl TryFrom<u8> for AlertLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(AlertLevel::Normal),
            1 => Ok(AlertLevel::Mild),
            2 => Ok(AlertLevel::Moderate),
            3 => Ok(AlertLevel::Severe),
            other => Err(format!("alert level must be 0..=3, got {}", other)),
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.as_str())
    }
}

// -------------------- Behavior Name Discipline --------------------

/// Behavior names are model class names: lowercase ASCII, digits, `_`, `-`.
///
/// Allowed: "sleep", "turn_around", "look-down"
/// Disallowed: whitespace, uppercase, punctuation, empty strings.
pub fn validate_behavior_name(name: &str) -> Result<()> {
    static BEHAVIOR_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = BEHAVIOR_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_-]{1,64}$").expect("behavior name pattern")
    });
    if !re.is_match(name) {
        return Err(anyhow!(
            "behavior name {:?} must match ^[a-z0-9_-]{{1,64}}$",
            name
        ));
    }
    Ok(())
}

// -------------------- Time --------------------

/// Wall-clock seconds since the Unix epoch.
pub fn now_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Round to three decimal places.
pub(crate) fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_levels_are_ordinal() {
        assert!(AlertLevel::Severe > AlertLevel::Moderate);
        assert!(AlertLevel::Moderate > AlertLevel::Mild);
        assert!(AlertLevel::Mild > AlertLevel::Normal);
        assert_eq!(AlertLevel::ALL.iter().max(), Some(&AlertLevel::Severe));
    }

    #[test]
    fn alert_level_clamps_out_of_range() {
        assert_eq!(AlertLevel::clamped(-4), AlertLevel::Normal);
        assert_eq!(AlertLevel::clamped(2), AlertLevel::Moderate);
        assert_eq!(AlertLevel::clamped(9), AlertLevel::Severe);
    }

    #[test]
    fn alert_level_serializes_as_number() {
        assert_eq!(serde_json::to_string(&AlertLevel::Moderate).unwrap(), "2");
        let level: AlertLevel = serde_json::from_str("3").unwrap();
        assert_eq!(level, AlertLevel::Severe);
        assert!(serde_json::from_str::<AlertLevel>("4").is_err());
    }

    #[test]
    fn behavior_names_follow_allowlist() {
        assert!(validate_behavior_name("sleep").is_ok());
        assert!(validate_behavior_name("turn_around").is_ok());
        assert!(validate_behavior_name("look-down").is_ok());
        assert!(validate_behavior_name("").is_err());
        assert!(validate_behavior_name("Sleep").is_err());
        assert!(validate_behavior_name("talk; drop table").is_err());
    }

    #[test]
    fn round3_rounds_half_away() {
        assert_eq!(round3(0.12345), 0.123);
        assert_eq!(round3(0.8566667), 0.857);
    }
}
