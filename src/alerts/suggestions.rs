use std::collections::HashMap;

use crate::AlertLevel;

pub const GENERIC_SUGGESTION: &str =
    "Keep observing the student and step in if the behavior continues";

const DEFAULT_TEMPLATES: &[(&str, &[&str])] = &[
    (
        "sleep",
        &[
            "Gently wake the student and check whether they feel unwell",
            "Ask the student a question to bring them back into the lesson",
            "Follow up after class about rest and workload",
        ],
    ),
    (
        "phone",
        &[
            "Remind the student that phones stay put away during class",
            "Ask the student to place the phone face down on the desk",
            "Inform the homeroom teacher if phone use continues",
        ],
    ),
    (
        "talk",
        &[
            "Remind the class to stay focused on the current task",
            "Walk over to the talking students",
            "Turn the chatter into a short pair discussion on the topic",
        ],
    ),
    (
        "turn_around",
        &[
            "Make eye contact and signal the student to face forward",
            "Check whether the student needs material from a classmate",
            "Consider adjusting the seating plan",
        ],
    ),
    (
        "look_down",
        &[
            "Check whether students are following the material",
            "Invite a student to answer a question",
            "Switch to a more interactive activity",
        ],
    ),
    (
        "lean",
        &[
            "Remind the student to sit upright",
            "Check whether the student is tired or unwell",
        ],
    ),
];

/// Intervention suggestions per behavior.
#[derive(Clone, Debug)]
pub struct SuggestionBook {
    templates: HashMap<String, Vec<String>>,
}

impl Default for SuggestionBook {
    fn default() -> Self {
        let templates = DEFAULT_TEMPLATES
            .iter()
            .map(|(behavior, lines)| {
                (
                    behavior.to_string(),
                    lines.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();
        Self { templates }
    }
}

impl SuggestionBook {
    /// Defaults with per-behavior replacements applied.
    pub fn with_overrides(overrides: &HashMap<String, Vec<String>>) -> Self {
        let mut book = Self::default();
        for (behavior, lines) in overrides {
            if lines.is_empty() {
                book.templates.remove(behavior);
            } else {
                book.templates.insert(behavior.clone(), lines.clone());
            }
        }
        book
    }

    /// Template for `behavior`. Combination labels (`a+b`) use the
    /// concatenated templates of their members.
    fn template(&self, behavior: &str) -> Option<Vec<String>> {
        if let Some(lines) = self.templates.get(behavior) {
            return Some(lines.clone());
        }
        if !behavior.contains('+') {
            return None;
        }
        let merged: Vec<String> = behavior
            .split('+')
            .filter_map(|part| self.templates.get(part))
            .flatten()
            .cloned()
            .collect();
        if merged.is_empty() {
            None
        } else {
            Some(merged)
        }
    }

    /// Level 3 gets every suggestion, level 2 the first two, lower levels
    /// the first one. Unknown behaviors get a single generic line.
    pub fn for_alert(&self, behavior: &str, level: AlertLevel) -> Vec<String> {
        let Some(lines) = self.template(behavior) else {
            return vec![GENERIC_SUGGESTION.to_string()];
        };
        let take = match level {
            AlertLevel::Severe => lines.len(),
            AlertLevel::Moderate => 2,
            AlertLevel::Mild | AlertLevel::Normal => 1,
        };
        lines.into_iter().take(take).collect()
    }
}
