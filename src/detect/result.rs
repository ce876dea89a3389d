use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// Coarse behavior kind assigned by the inference model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorKind {
    #[default]
    Normal,
    Warning,
}

/// One object observed in one frame.
///
/// Detections are produced by the external inference collaborator and are
/// never mutated by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BBox,
    #[serde(default)]
    pub behavior_kind: BehaviorKind,
}

impl Detection {
    pub fn new(class_id: u32, class_name: &str, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            class_name: class_name.to_string(),
            confidence,
            bbox,
            behavior_kind: BehaviorKind::Normal,
        }
    }

    pub fn with_kind(mut self, kind: BehaviorKind) -> Self {
        self.behavior_kind = kind;
        self
    }

    pub fn is_warning(&self) -> bool {
        self.behavior_kind == BehaviorKind::Warning
    }

    /// True when this detection is `behavior` at or above `min_confidence`.
    pub fn qualifies(&self, behavior: &str, min_confidence: f32) -> bool {
        self.class_name == behavior && self.confidence >= min_confidence
    }
}
