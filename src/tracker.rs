//! Frame-to-frame identity tracking.
//!
//! Greedy IoU matching is sufficient for the tens of students visible in one
//! classroom camera. Tracks coast for `max_lost_frames` frames before
//! eviction, and the live set is capped at `max_tracked_objects`.
//!
//! Track ids are session-scoped, strictly increasing, and never reused, even
//! across `reset()`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::detect::Detection;
use crate::geometry::{iou, BBox};

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MAX_LOST_FRAMES: u64 = 5;
pub const DEFAULT_MAX_TRACKED_OBJECTS: usize = 100;
/// Number of recent class ids kept per track.
pub const BEHAVIOR_HISTORY_LEN: usize = 10;

pub type TrackId = u64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum IoU to match a detection to an existing track.
    pub iou_threshold: f32,
    /// Frames a track survives without a detection before eviction.
    pub max_lost_frames: u64,
    /// Hard cap on live tracks.
    pub max_tracked_objects: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_lost_frames: DEFAULT_MAX_LOST_FRAMES,
            max_tracked_objects: DEFAULT_MAX_TRACKED_OBJECTS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BBox,
    pub last_seen_frame: u64,
    history: VecDeque<u32>,
}

impl Track {
    fn new(id: TrackId, det: &Detection, frame: u64) -> Self {
        let mut history = VecDeque::with_capacity(BEHAVIOR_HISTORY_LEN);
        history.push_back(det.class_id);
        Self {
            id,
            bbox: det.bbox,
            last_seen_frame: frame,
            history,
        }
    }

    fn refresh(&mut self, det: &Detection, frame: u64) {
        self.bbox = det.bbox;
        self.last_seen_frame = frame;
        self.history.push_back(det.class_id);
        while self.history.len() > BEHAVIOR_HISTORY_LEN {
            self.history.pop_front();
        }
    }

    /// Recent class ids, oldest first.
    pub fn behavior_history(&self) -> impl Iterator<Item = u32> + '_ {
        self.history.iter().copied()
    }

    /// Most frequent class id in the history. Ties go to the most recent.
    pub fn dominant_class(&self) -> Option<u32> {
        let mut counts: HashMap<u32, usize> = HashMap::new();
        for class_id in &self.history {
            *counts.entry(*class_id).or_default() += 1;
        }
        let top = counts.values().copied().max()?;
        self.history
            .iter()
            .rev()
            .find(|class_id| counts.get(class_id) == Some(&top))
            .copied()
    }
}

pub struct PositionTracker {
    config: TrackerConfig,
    // BTreeMap keeps iteration in id order so tie-breaks are deterministic.
    tracks: BTreeMap<TrackId, Track>,
    next_track_id: TrackId,
    current_frame: u64,
}

impl PositionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_track_id: 1,
            current_frame: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Process one frame. Returns `(track_id, detection)` in input order.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<(TrackId, Detection)> {
        self.current_frame += 1;
        let frame = self.current_frame;

        // 1. Match: greedy one-to-one, highest IoU first.
        let mut pairs: Vec<(usize, TrackId, f32)> = Vec::new();
        for (det_idx, det) in detections.iter().enumerate() {
            for track in self.tracks.values() {
                let overlap = iou(&det.bbox, &track.bbox);
                if overlap >= self.config.iou_threshold && overlap > 0.0 {
                    pairs.push((det_idx, track.id, overlap));
                }
            }
        }
        // Stable sort: equal IoU resolves by detection order, then track id.
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
        let mut claimed: Vec<TrackId> = Vec::new();
        for (det_idx, track_id, _) in pairs {
            if assigned[det_idx].is_some() || claimed.contains(&track_id) {
                continue;
            }
            assigned[det_idx] = Some(track_id);
            claimed.push(track_id);
        }

        // 2. Create + 3. Refresh.
        let mut out = Vec::with_capacity(detections.len());
        for (det, slot) in detections.iter().zip(assigned) {
            let track_id = match slot {
                Some(track_id) => {
                    if let Some(track) = self.tracks.get_mut(&track_id) {
                        track.refresh(det, frame);
                    }
                    track_id
                }
                None => {
                    let track_id = self.next_track_id;
                    self.next_track_id += 1;
                    self.tracks.insert(track_id, Track::new(track_id, det, frame));
                    log::debug!("track {} created ({})", track_id, det.class_name);
                    track_id
                }
            };
            out.push((track_id, det.clone()));
        }

        // 4. Evict stale.
        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|id, track| {
            let keep = frame - track.last_seen_frame <= max_lost;
            if !keep {
                log::debug!("track {} evicted after {} lost frames", id, max_lost);
            }
            keep
        });

        // 5. Enforce capacity.
        self.enforce_capacity();

        out
    }

    fn enforce_capacity(&mut self) {
        let cap = self.config.max_tracked_objects;
        if self.tracks.len() <= cap {
            return;
        }
        let mut by_age: Vec<(u64, TrackId)> = self
            .tracks
            .values()
            .map(|t| (t.last_seen_frame, t.id))
            .collect();
        by_age.sort_unstable();
        let excess = self.tracks.len() - cap;
        for (_, id) in by_age.into_iter().take(excess) {
            self.tracks.remove(&id);
        }
        log::warn!(
            "tracker over capacity: evicted {} oldest tracks (cap {})",
            excess,
            cap
        );
    }

    pub fn active_track_ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop all tracks. The id counter keeps counting.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.current_frame = 0;
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: &str, bbox: [f32; 4]) -> Detection {
        Detection::new(1, class, 0.9, bbox.into())
    }

    fn det_id(class_id: u32, bbox: [f32; 4]) -> Detection {
        Detection::new(class_id, "read", 0.9, bbox.into())
    }

    #[test]
    fn same_box_keeps_same_id() {
        let mut tracker = PositionTracker::default();
        let a = det("read", [0.0, 0.0, 10.0, 10.0]);
        let first = tracker.update(std::slice::from_ref(&a));
        for _ in 0..5 {
            let next = tracker.update(std::slice::from_ref(&a));
            assert_eq!(next[0].0, first[0].0);
        }
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn nearby_boxes_match_distant_boxes_spawn() {
        let mut tracker = PositionTracker::default();
        let out = tracker.update(&[det("read", [0.0, 0.0, 10.0, 10.0])]);
        let id = out[0].0;

        let out = tracker.update(&[
            det("read", [1.0, 0.0, 11.0, 10.0]),
            det("talk", [100.0, 100.0, 120.0, 120.0]),
        ]);
        assert_eq!(out[0].0, id);
        assert_ne!(out[1].0, id);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn greedy_assignment_is_one_to_one() {
        let mut tracker = PositionTracker::default();
        let out = tracker.update(&[det("read", [0.0, 0.0, 10.0, 10.0])]);
        let id = out[0].0;

        // Both overlap the track; the exact match claims it.
        let out = tracker.update(&[
            det("read", [1.0, 0.0, 11.0, 10.0]),
            det("read", [0.0, 0.0, 10.0, 10.0]),
        ]);
        assert_eq!(out[1].0, id);
        assert_ne!(out[0].0, id);
    }

    #[test]
    fn stale_tracks_are_evicted_and_ids_not_reused() {
        let mut tracker = PositionTracker::new(TrackerConfig {
            max_lost_frames: 2,
            ..TrackerConfig::default()
        });
        let a = det("read", [0.0, 0.0, 10.0, 10.0]);
        let first = tracker.update(std::slice::from_ref(&a))[0].0;

        tracker.update(&[]);
        tracker.update(&[]);
        assert_eq!(tracker.len(), 1, "survives max_lost_frames");
        tracker.update(&[]);
        assert!(tracker.is_empty());

        let again = tracker.update(std::slice::from_ref(&a))[0].0;
        assert!(again > first);
    }

    #[test]
    fn capacity_evicts_oldest_last_seen() {
        let mut tracker = PositionTracker::new(TrackerConfig {
            max_tracked_objects: 2,
            ..TrackerConfig::default()
        });
        let a = tracker.update(&[det("read", [0.0, 0.0, 10.0, 10.0])])[0].0;
        let b = tracker.update(&[det("read", [50.0, 0.0, 60.0, 10.0])])[0].0;
        let c = tracker.update(&[det("read", [100.0, 0.0, 110.0, 10.0])])[0].0;

        let active = tracker.active_track_ids();
        assert_eq!(active, vec![b, c]);
        assert!(tracker.track(a).is_none());
    }

    #[test]
    fn capacity_ties_drop_lowest_id() {
        let mut tracker = PositionTracker::new(TrackerConfig {
            max_tracked_objects: 1,
            ..TrackerConfig::default()
        });
        let out = tracker.update(&[
            det("read", [0.0, 0.0, 10.0, 10.0]),
            det("read", [50.0, 0.0, 60.0, 10.0]),
        ]);
        assert_eq!(tracker.active_track_ids(), vec![out[1].0]);
    }

    #[test]
    fn degenerate_boxes_always_spawn_new_tracks() {
        let mut tracker = PositionTracker::default();
        let bad = det("read", [10.0, 10.0, 0.0, 0.0]);
        let a = tracker.update(std::slice::from_ref(&bad))[0].0;
        let b = tracker.update(std::slice::from_ref(&bad))[0].0;
        assert_ne!(a, b);
    }

    #[test]
    fn history_is_bounded_and_tracks_dominant_class() {
        let mut tracker = PositionTracker::default();
        let bbox = [0.0, 0.0, 10.0, 10.0];
        let id = tracker.update(&[det_id(3, bbox)])[0].0;
        for i in 0..15 {
            let class_id = if i % 3 == 0 { 3 } else { 4 };
            tracker.update(&[det_id(class_id, bbox)]);
        }
        let track = tracker.track(id).unwrap();
        assert_eq!(track.behavior_history().count(), BEHAVIOR_HISTORY_LEN);
        assert_eq!(track.dominant_class(), Some(4));
    }

    #[test]
    fn reset_keeps_id_counter() {
        let mut tracker = PositionTracker::default();
        let a = tracker.update(&[det("read", [0.0, 0.0, 10.0, 10.0])])[0].0;
        tracker.reset();
        assert!(tracker.is_empty());
        let b = tracker.update(&[det("read", [0.0, 0.0, 10.0, 10.0])])[0].0;
        assert!(b > a);
    }
}
