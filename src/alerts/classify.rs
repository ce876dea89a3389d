use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{validate_behavior_name, AlertLevel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorCategory {
    Severe,
    Moderate,
    Mild,
    Other,
}

/// Severity buckets for behavior names, supplied by configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BehaviorCategories {
    pub severe: Vec<String>,
    pub moderate: Vec<String>,
    pub mild: Vec<String>,
}

impl Default for BehaviorCategories {
    fn default() -> Self {
        Self {
            severe: vec!["sleep".to_string(), "phone".to_string()],
            moderate: vec!["talk".to_string(), "turn_around".to_string()],
            mild: vec!["look_down".to_string(), "lean".to_string()],
        }
    }
}

impl BehaviorCategories {
    /// First bucket wins if a behavior is listed more than once.
    pub fn category_of(&self, behavior: &str) -> BehaviorCategory {
        if self.severe.iter().any(|b| b == behavior) {
            BehaviorCategory::Severe
        } else if self.moderate.iter().any(|b| b == behavior) {
            BehaviorCategory::Moderate
        } else if self.mild.iter().any(|b| b == behavior) {
            BehaviorCategory::Mild
        } else {
            BehaviorCategory::Other
        }
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.severe.iter().chain(&self.moderate).chain(&self.mild) {
            validate_behavior_name(name)?;
        }
        Ok(())
    }
}

/// Severity for an occurrence that no rule graded, e.g. a model-origin
/// alert.
pub fn classify_alert_level(
    categories: &BehaviorCategories,
    behavior: &str,
    count: u32,
    confidence: f32,
) -> AlertLevel {
    match categories.category_of(behavior) {
        BehaviorCategory::Severe => {
            if count >= 3 || confidence >= 0.9 {
                AlertLevel::Severe
            } else if count >= 2 || confidence >= 0.7 {
                AlertLevel::Moderate
            } else {
                AlertLevel::Mild
            }
        }
        BehaviorCategory::Moderate => {
            if count >= 5 || confidence >= 0.9 {
                AlertLevel::Severe
            } else if count >= 3 || confidence >= 0.7 {
                AlertLevel::Moderate
            } else {
                AlertLevel::Mild
            }
        }
        BehaviorCategory::Mild => {
            if count >= 5 {
                AlertLevel::Moderate
            } else if count >= 2 {
                AlertLevel::Mild
            } else {
                AlertLevel::Normal
            }
        }
        BehaviorCategory::Other => AlertLevel::Normal,
    }
}
