//! Per-track behavior deduplication.
//!
//! A detection is recorded when it carries new information for its track:
//! the first sighting, a change of behavior, or the same behavior after its
//! cooldown has elapsed. Everything else is counted and skipped.
//!
//! Times are seconds since the Unix epoch as `f64`. The `*_at` variants take
//! an explicit clock reading; the plain variants read the system clock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::detect::Detection;
use crate::geometry::{iou, BBox};
use crate::now_s;
use crate::tracker::TrackId;

pub const DEFAULT_COOLDOWN_SECS: f64 = 30.0;
/// IoU above which a skipped detection counts as "same place, same behavior".
pub const DEFAULT_STATIONARY_IOU: f32 = 0.7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    pub default_cooldown_s: f64,
    /// Per-behavior cooldowns keyed by class name.
    pub cooldowns: HashMap<String, f64>,
    pub stationary_iou: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            default_cooldown_s: DEFAULT_COOLDOWN_SECS,
            cooldowns: HashMap::new(),
            stationary_iou: DEFAULT_STATIONARY_IOU,
        }
    }
}

impl DedupConfig {
    /// Clamp negative or non-finite cooldowns to zero.
    pub fn sanitized(mut self) -> Self {
        self.default_cooldown_s = clamp_cooldown(self.default_cooldown_s);
        for value in self.cooldowns.values_mut() {
            *value = clamp_cooldown(*value);
        }
        if !(0.0..=1.0).contains(&self.stationary_iou) {
            self.stationary_iou = DEFAULT_STATIONARY_IOU;
        }
        self
    }
}

fn clamp_cooldown(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Why a detection was (or was not) recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordReason {
    NewTarget,
    BehaviorChanged,
    CooldownExpired,
    WithinCooldown,
}

impl RecordReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewTarget => "new_target",
            Self::BehaviorChanged => "behavior_changed",
            Self::CooldownExpired => "cooldown_expired",
            Self::WithinCooldown => "within_cooldown",
        }
    }

    pub fn records(&self) -> bool {
        !matches!(self, Self::WithinCooldown)
    }
}

impl std::fmt::Display for RecordReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BehaviorState {
    pub track_id: TrackId,
    pub behavior_id: u32,
    pub behavior_name: String,
    pub start_time: f64,
    pub last_update_time: f64,
    /// `None` until the first recorded observation.
    pub last_record_time: Option<f64>,
    pub last_bbox: BBox,
}

impl BehaviorState {
    /// Seconds the current behavior has been held continuously.
    pub fn held_for(&self, now: f64) -> f64 {
        (now - self.start_time).max(0.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DedupStats {
    pub total_detections: u64,
    pub recorded_count: u64,
    pub skipped_same_behavior: u64,
    pub skipped_cooldown: u64,
    pub active_states: usize,
    pub dedup_rate: f64,
}

pub struct DeduplicationEngine {
    config: DedupConfig,
    states: BTreeMap<TrackId, BehaviorState>,
    total_detections: u64,
    recorded_count: u64,
    skipped_same_behavior: u64,
    skipped_cooldown: u64,
}

impl DeduplicationEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config: config.sanitized(),
            states: BTreeMap::new(),
            total_detections: 0,
            recorded_count: 0,
            skipped_same_behavior: 0,
            skipped_cooldown: 0,
        }
    }

    pub fn cooldown_for(&self, behavior: &str) -> f64 {
        self.config
            .cooldowns
            .get(behavior)
            .copied()
            .unwrap_or(self.config.default_cooldown_s)
    }

    /// Override one behavior's cooldown. Negative values clamp to zero.
    pub fn set_cooldown(&mut self, behavior: &str, seconds: f64) {
        self.config
            .cooldowns
            .insert(behavior.to_string(), clamp_cooldown(seconds));
    }

    pub fn should_record(&self, track_id: TrackId, det: &Detection) -> (bool, RecordReason) {
        self.should_record_at(track_id, det, now_s())
    }

    pub fn should_record_at(
        &self,
        track_id: TrackId,
        det: &Detection,
        now: f64,
    ) -> (bool, RecordReason) {
        let reason = match self.states.get(&track_id) {
            None => RecordReason::NewTarget,
            Some(state) if state.behavior_id != det.class_id => RecordReason::BehaviorChanged,
            Some(state) => match state.last_record_time {
                None => RecordReason::CooldownExpired,
                Some(last) if now - last >= self.cooldown_for(&det.class_name) => {
                    RecordReason::CooldownExpired
                }
                Some(_) => RecordReason::WithinCooldown,
            },
        };
        (reason.records(), reason)
    }

    pub fn update_state(&mut self, track_id: TrackId, det: &Detection, recorded: bool) {
        self.update_state_at(track_id, det, recorded, now_s())
    }

    pub fn update_state_at(
        &mut self,
        track_id: TrackId,
        det: &Detection,
        recorded: bool,
        now: f64,
    ) {
        let state = self
            .states
            .entry(track_id)
            .or_insert_with(|| BehaviorState {
                track_id,
                behavior_id: det.class_id,
                behavior_name: det.class_name.clone(),
                start_time: now,
                last_update_time: now,
                last_record_time: None,
                last_bbox: det.bbox,
            });

        if state.behavior_id != det.class_id {
            log::debug!(
                "track {} behavior {} -> {}",
                track_id,
                state.behavior_name,
                det.class_name
            );
            state.behavior_id = det.class_id;
            state.behavior_name = det.class_name.clone();
            state.start_time = now;
        }
        state.last_update_time = now;
        state.last_bbox = det.bbox;
        if recorded {
            state.last_record_time = Some(now);
        }
    }

    /// Decide, update state and count in one step.
    pub fn observe_at(&mut self, track_id: TrackId, det: &Detection, now: f64) -> RecordReason {
        let (record, reason) = self.should_record_at(track_id, det, now);
        self.total_detections += 1;
        if record {
            self.recorded_count += 1;
        } else {
            let stationary = self
                .states
                .get(&track_id)
                .map(|s| iou(&s.last_bbox, &det.bbox) >= self.config.stationary_iou)
                .unwrap_or(false);
            if stationary {
                self.skipped_same_behavior += 1;
            } else {
                self.skipped_cooldown += 1;
            }
        }
        self.update_state_at(track_id, det, record, now);
        reason
    }

    /// Drop states whose track is no longer active.
    pub fn cleanup_stale_states(&mut self, active_track_ids: &[TrackId]) -> usize {
        let active: HashSet<TrackId> = active_track_ids.iter().copied().collect();
        let before = self.states.len();
        self.states.retain(|id, _| active.contains(id));
        before - self.states.len()
    }

    pub fn state(&self, track_id: TrackId) -> Option<&BehaviorState> {
        self.states.get(&track_id)
    }

    /// Insert a state directly, e.g. when restoring a session.
    pub fn restore_state(&mut self, state: BehaviorState) {
        self.states.insert(state.track_id, state);
    }

    /// Unique active tracks per behavior name.
    pub fn active_behavior_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for state in self.states.values() {
            *counts.entry(state.behavior_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Longest continuous hold per behavior across active tracks.
    pub fn behavior_durations(&self, now: f64) -> HashMap<String, f64> {
        let mut out: HashMap<String, f64> = HashMap::new();
        for state in self.states.values() {
            let held = state.held_for(now);
            let entry = out.entry(state.behavior_name.clone()).or_insert(0.0);
            if held > *entry {
                *entry = held;
            }
        }
        out
    }

    pub fn dedup_rate(&self) -> f64 {
        if self.total_detections == 0 {
            return 0.0;
        }
        (self.total_detections - self.recorded_count) as f64 / self.total_detections as f64
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total_detections: self.total_detections,
            recorded_count: self.recorded_count,
            skipped_same_behavior: self.skipped_same_behavior,
            skipped_cooldown: self.skipped_cooldown,
            active_states: self.states.len(),
            dedup_rate: self.dedup_rate(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.total_detections = 0;
        self.recorded_count = 0;
        self.skipped_same_behavior = 0;
        self.skipped_cooldown = 0;
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
