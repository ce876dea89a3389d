//! One live detection session.
//!
//! A session owns its tracker and dedup engine outright (single writer, no
//! sharing) and holds the aggregator, and through it the rule engine, behind
//! an `Arc` shared with other sessions.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::alerts::{Alert, AlertAggregator, AlertSink};
use crate::config::SentinelConfig;
use crate::dedup::{DedupStats, DeduplicationEngine, RecordReason};
use crate::detect::{Detection, DetectionSource};
use crate::now_s;
use crate::rules::EvaluationContext;
use crate::tracker::{PositionTracker, TrackId};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedDetection {
    pub track_id: TrackId,
    pub detection: Detection,
    pub recorded: bool,
    pub reason: RecordReason,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub tracked: Vec<TrackedDetection>,
    pub alerts: Vec<Alert>,
}

impl FrameReport {
    pub fn recorded(&self) -> impl Iterator<Item = &TrackedDetection> {
        self.tracked.iter().filter(|t| t.recorded)
    }
}

pub struct DetectionSession {
    session_id: String,
    tracker: PositionTracker,
    dedup: DeduplicationEngine,
    aggregator: Arc<AlertAggregator>,
    sink: Option<Box<dyn AlertSink + Send>>,
    alerts_emitted: u64,
}

impl DetectionSession {
    pub fn new(
        session_id: &str,
        tracker: PositionTracker,
        dedup: DeduplicationEngine,
        aggregator: Arc<AlertAggregator>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            tracker,
            dedup,
            aggregator,
            sink: None,
            alerts_emitted: 0,
        }
    }

    /// Fresh tracker and dedup engine from configuration.
    pub fn from_config(
        session_id: &str,
        cfg: &SentinelConfig,
        aggregator: Arc<AlertAggregator>,
    ) -> Self {
        Self::new(
            session_id,
            PositionTracker::new(cfg.tracker.clone()),
            DeduplicationEngine::new(cfg.dedup.clone()),
            aggregator,
        )
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn dedup(&self) -> &DeduplicationEngine {
        &self.dedup
    }

    pub fn process_frame(&mut self, detections: &[Detection]) -> Result<FrameReport> {
        let now = now_s();
        self.process_frame_at(detections, EvaluationContext::new(&self.session_id, now), now)
    }

    /// Run one frame through both paths.
    ///
    /// Tracking and dedup first, so behavior durations missing from `ctx`
    /// can be filled from the updated per-track state. Rules then see the
    /// raw batch, untouched by dedup.
    pub fn process_frame_at(
        &mut self,
        detections: &[Detection],
        mut ctx: EvaluationContext,
        now: f64,
    ) -> Result<FrameReport> {
        let tracked_pairs = self.tracker.update(detections);
        let mut tracked = Vec::with_capacity(tracked_pairs.len());
        for (track_id, detection) in tracked_pairs {
            let reason = self.dedup.observe_at(track_id, &detection, now);
            tracked.push(TrackedDetection {
                track_id,
                detection,
                recorded: reason.records(),
                reason,
            });
        }
        let dropped = self
            .dedup
            .cleanup_stale_states(&self.tracker.active_track_ids());
        if dropped > 0 {
            log::debug!(
                "session {}: dropped {} behavior states for evicted tracks",
                self.session_id,
                dropped
            );
        }

        if ctx.session_id.is_empty() {
            ctx.session_id = self.session_id.clone();
        }
        for (behavior, held) in self.dedup.behavior_durations(now) {
            ctx.behavior_durations.entry(behavior).or_insert(held);
        }

        let alerts = self
            .aggregator
            .generate_alerts(detections, &self.session_id, &ctx)?;
        if !alerts.is_empty() {
            self.alerts_emitted += alerts.len() as u64;
            if let Some(sink) = self.sink.as_mut() {
                sink.publish(&alerts)?;
            }
        }

        Ok(FrameReport {
            frame_index: self.tracker.current_frame(),
            tracked,
            alerts,
        })
    }

    /// Drain `source` frame by frame, spacing frames `frame_interval_s`
    /// apart starting at `start`. Returns the number of frames processed.
    pub fn run_source(
        &mut self,
        source: &mut dyn DetectionSource,
        start: f64,
        frame_interval_s: f64,
        mut on_frame: impl FnMut(&FrameReport),
    ) -> Result<u64> {
        source.warm_up()?;
        let mut frames = 0u64;
        while let Some(detections) = source.next_frame()? {
            let now = start + frames as f64 * frame_interval_s;
            let ctx = EvaluationContext::new(&self.session_id, now);
            let report = self.process_frame_at(&detections, ctx, now)?;
            on_frame(&report);
            frames += 1;
        }
        log::info!(
            "session {}: {} frames from {} source, {} alerts",
            self.session_id,
            frames,
            source.name(),
            self.alerts_emitted
        );
        Ok(frames)
    }

    pub fn stats(&self) -> DedupStats {
        self.dedup.stats()
    }

    /// Unique active tracks per behavior name, for live display.
    pub fn active_behavior_counts(&self) -> BTreeMap<String, usize> {
        self.dedup.active_behavior_counts()
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedSource;
    use crate::geometry::BBox;
    use crate::rules::{RuleEngine, RuleRecord};
    use crate::tracker::TrackerConfig;
    use crate::{AlertLevel, DedupConfig};

    const T0: f64 = 1_700_000_000.0;

    fn sleep_at(x: f32) -> Detection {
        Detection::new(4, "sleep", 0.9, BBox::new(x, 0.0, x + 20.0, 20.0))
    }

    fn session(records: Vec<RuleRecord>) -> DetectionSession {
        let aggregator = Arc::new(AlertAggregator::new(Arc::new(RuleEngine::with_records(
            records,
        ))));
        let mut dedup = DedupConfig::default();
        dedup.cooldowns.insert("sleep".to_string(), 30.0);
        DetectionSession::new(
            "class-7a",
            PositionTracker::new(TrackerConfig::default()),
            DeduplicationEngine::new(dedup),
            aggregator,
        )
    }

    fn sleep_duration_rule() -> RuleRecord {
        RuleRecord {
            id: 3,
            name: "prolonged sleeping".to_string(),
            rule_type: "duration".to_string(),
            behavior: Some("sleep".to_string()),
            duration_seconds: Some(60.0),
            alert_level: Some(3),
            ..RuleRecord::default()
        }
    }

    #[test]
    fn repeated_frames_record_once_per_cooldown() {
        let mut s = session(vec![]);
        let frame = [sleep_at(0.0), sleep_at(100.0)];
        let first = s
            .process_frame_at(&frame, EvaluationContext::new("", T0), T0)
            .unwrap();
        assert_eq!(first.recorded().count(), 2);

        let second = s
            .process_frame_at(&frame, EvaluationContext::new("", T0 + 1.0), T0 + 1.0)
            .unwrap();
        assert_eq!(second.recorded().count(), 0);
        assert_eq!(second.tracked[0].track_id, first.tracked[0].track_id);

        let stats = s.stats();
        assert_eq!(stats.total_detections, 4);
        assert_eq!(stats.recorded_count, 2);
        assert_eq!(s.active_behavior_counts().get("sleep"), Some(&2));
    }

    #[test]
    fn duration_rule_fires_from_tracked_hold() {
        let mut s = session(vec![sleep_duration_rule()]);
        let frame = [sleep_at(0.0)];
        let mut fired = Vec::new();
        for step in 0..8 {
            let now = T0 + step as f64 * 10.0;
            let report = s
                .process_frame_at(&frame, EvaluationContext::new("", now), now)
                .unwrap();
            if !report.alerts.is_empty() {
                fired.push(step);
            }
        }
        // Held for 60s at step 6.
        assert_eq!(fired, vec![6, 7]);
        assert_eq!(s.alerts_emitted(), 2);
    }

    #[test]
    fn explicit_context_duration_wins() {
        let mut s = session(vec![sleep_duration_rule()]);
        let ctx = EvaluationContext::new("", T0).with_duration("sleep", 120.0);
        let report = s.process_frame_at(&[sleep_at(0.0)], ctx, T0).unwrap();
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].alert_level, AlertLevel::Severe);
        assert_eq!(report.alerts[0].session_id, "class-7a");
    }

    #[test]
    fn evicted_tracks_lose_behavior_state() {
        let mut s = session(vec![]);
        s.process_frame_at(&[sleep_at(0.0)], EvaluationContext::new("", T0), T0)
            .unwrap();
        for step in 1..=6 {
            let now = T0 + step as f64;
            s.process_frame_at(&[], EvaluationContext::new("", now), now)
                .unwrap();
        }
        assert!(s.tracker().is_empty());
        assert!(s.active_behavior_counts().is_empty());
    }

    #[test]
    fn run_source_reports_alert_frames() {
        let rule = RuleRecord {
            id: 1,
            name: "sleepers".to_string(),
            rule_type: "threshold".to_string(),
            behavior: Some("sleep".to_string()),
            threshold: Some(2),
            alert_level: Some(2),
            ..RuleRecord::default()
        };
        let mut s = session(vec![rule]);
        let mut source = ScriptedSource::new(vec![
            vec![sleep_at(0.0)],
            vec![sleep_at(0.0), sleep_at(100.0)],
            vec![],
        ]);
        let mut alert_frames = Vec::new();
        let frames = s
            .run_source(&mut source, T0, 0.5, |report| {
                if !report.alerts.is_empty() {
                    alert_frames.push(report.frame_index);
                }
            })
            .unwrap();
        assert_eq!(frames, 3);
        assert_eq!(alert_frames, vec![2]);
    }
}
