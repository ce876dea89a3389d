//! Alerts: construction from rule matches, per-call merging, severity
//! classification and the sink boundary.

mod aggregator;
mod classify;
mod sink;
mod suggestions;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::geometry::BBox;
use crate::AlertLevel;

pub use aggregator::{merge_alerts, AlertAggregator, MAX_MERGED_SUGGESTIONS};
pub use classify::{classify_alert_level, BehaviorCategories, BehaviorCategory};
pub use sink::{AlertSink, InMemoryAlertSink, JsonLinesSink};
pub use suggestions::{SuggestionBook, GENERIC_SUGGESTION};

/// Alert type for alerts built by `AlertAggregator::alert_from_model`.
pub const MODEL_ALERT_TYPE: &str = "model";
/// Alert type for a merge of alerts with differing types.
pub const AGGREGATED_ALERT_TYPE: &str = "aggregated";

/// Alert handed to persistence and notification collaborators.
///
/// Once published, only `is_read` may change, and only through the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: u64,
    pub session_id: String,
    pub alert_level: AlertLevel,
    /// Rule type name, `model`, or `aggregated`.
    pub alert_type: String,
    pub behavior: String,
    pub behavior_count: u32,
    pub confidence: f32,
    pub location_info: Vec<BBox>,
    pub triggered_rules: BTreeSet<i64>,
    pub suggestions: Vec<String>,
    /// Seconds since the Unix epoch.
    pub created_at: f64,
    pub is_read: bool,
}
