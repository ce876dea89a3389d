use std::sync::{Arc, Mutex};

use anyhow::Result;

use classroom_sentinel::alerts::{Alert, AlertSink};
use classroom_sentinel::rules::default_rules;
use classroom_sentinel::{
    classify_alert_level, AlertAggregator, AlertLevel, BBox, BehaviorCategories, BehaviorState,
    DedupConfig, DeduplicationEngine, Detection, DetectionSession, EvaluationContext,
    PositionTracker, RecordReason, RuleEngine, RuleRecord, TrackerConfig,
};

const T0: f64 = 1_700_000_000.0;
const TALK: u32 = 2;
const SLEEP: u32 = 4;

fn det(class_id: u32, name: &str, confidence: f32, x: f32) -> Detection {
    Detection::new(class_id, name, confidence, BBox::new(x, 0.0, x + 40.0, 40.0))
}

fn talk_frequency_rule() -> RuleRecord {
    RuleRecord {
        id: 1,
        name: "repeated talking".to_string(),
        rule_type: "frequency".to_string(),
        behavior: Some("talk".to_string()),
        threshold: Some(3),
        time_window: Some(120.0),
        alert_level: Some(1),
        ..RuleRecord::default()
    }
}

#[test]
fn scenario_a_two_talkers_below_frequency_threshold() {
    let engine = RuleEngine::with_records(vec![talk_frequency_rule()]);
    let rules = engine.rules(T0).unwrap();
    assert_eq!(rules.len(), 1);
    assert!(rules.iter().all(|r| r.active));

    let batch = [det(TALK, "talk", 0.8, 0.0), det(TALK, "talk", 0.8, 100.0)];
    let ctx = EvaluationContext::new("s", T0);
    assert!(engine.evaluate(&batch, &ctx).unwrap().is_empty());
}

#[test]
fn scenario_b_third_talker_reaches_threshold() {
    let engine = RuleEngine::with_records(vec![talk_frequency_rule()]);
    let batch = [
        det(TALK, "talk", 0.8, 0.0),
        det(TALK, "talk", 0.8, 100.0),
        det(TALK, "talk", 0.8, 200.0),
    ];
    let ctx = EvaluationContext::new("s", T0);
    let matches = engine.evaluate(&batch, &ctx).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].matched_count, 3);
    assert_eq!(matches[0].rule_id, 1);
}

#[test]
fn frequency_counts_history_toward_threshold() {
    let engine = RuleEngine::with_records(vec![talk_frequency_rule()]);
    let batch = [det(TALK, "talk", 0.8, 0.0)];
    let ctx = EvaluationContext::new("s", T0).with_history("talk", 2);
    let matches = engine.evaluate(&batch, &ctx).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].matched_count, 3);
}

fn sleeping_track_7(last_record: f64) -> DeduplicationEngine {
    let mut cfg = DedupConfig::default();
    cfg.cooldowns.insert("sleep".to_string(), 30.0);
    let mut dedup = DeduplicationEngine::new(cfg);
    dedup.restore_state(BehaviorState {
        track_id: 7,
        behavior_id: SLEEP,
        behavior_name: "sleep".to_string(),
        start_time: last_record - 5.0,
        last_update_time: last_record,
        last_record_time: Some(last_record),
        last_bbox: BBox::new(0.0, 0.0, 40.0, 40.0),
    });
    dedup
}

#[test]
fn scenario_c_cooldown_expired_records_again() {
    let dedup = sleeping_track_7(T0 - 50.0);
    let decision = dedup.should_record_at(7, &det(SLEEP, "sleep", 0.9, 0.0), T0);
    assert_eq!(decision, (true, RecordReason::CooldownExpired));
    assert_eq!(decision.1.as_str(), "cooldown_expired");
}

#[test]
fn scenario_d_within_cooldown_is_skipped() {
    let dedup = sleeping_track_7(T0 - 10.0);
    let decision = dedup.should_record_at(7, &det(SLEEP, "sleep", 0.9, 0.0), T0);
    assert_eq!(decision, (false, RecordReason::WithinCooldown));
    assert_eq!(decision.1.as_str(), "within_cooldown");
}

#[test]
fn scenario_e_confident_sleepers_classify_severe() {
    let level = classify_alert_level(&BehaviorCategories::default(), "sleep", 3, 0.95);
    assert_eq!(level, AlertLevel::Severe);
    assert_eq!(level.as_u8(), 3);
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<Alert>>>);

impl AlertSink for SharedSink {
    fn publish(&mut self, alerts: &[Alert]) -> Result<()> {
        self.0.lock().unwrap().extend_from_slice(alerts);
        Ok(())
    }
}

fn default_session(sink: SharedSink) -> DetectionSession {
    let aggregator = Arc::new(AlertAggregator::new(Arc::new(RuleEngine::with_records(
        default_rules(),
    ))));
    DetectionSession::new(
        "room-3",
        PositionTracker::new(TrackerConfig::default()),
        DeduplicationEngine::new(DedupConfig::default()),
        aggregator,
    )
    .with_sink(Box::new(sink))
}

#[test]
fn session_tracks_dedups_and_alerts_end_to_end() {
    let sink = SharedSink::default();
    let mut session = default_session(sink.clone());

    let phone = Detection::new(1, "phone", 0.85, BBox::new(0.0, 0.0, 40.0, 40.0));
    let talker = Detection::new(TALK, "talk", 0.7, BBox::new(200.0, 0.0, 240.0, 40.0));

    let first = session
        .process_frame_at(
            &[phone.clone(), talker.clone()],
            EvaluationContext::new("", T0),
            T0,
        )
        .unwrap();
    assert_eq!(first.recorded().count(), 2);
    let behaviors: Vec<&str> = first.alerts.iter().map(|a| a.behavior.as_str()).collect();
    assert_eq!(behaviors, vec!["phone", "phone+talk"]);
    assert!(first.alerts.iter().all(|a| a.session_id == "room-3"));

    // Same students a second later: no new records, but the rules still fire.
    let second = session
        .process_frame_at(&[phone, talker], EvaluationContext::new("", T0 + 1.0), T0 + 1.0)
        .unwrap();
    assert_eq!(second.recorded().count(), 0);
    assert!(second
        .tracked
        .iter()
        .all(|t| t.reason == RecordReason::WithinCooldown));
    assert_eq!(second.alerts.len(), 2);

    let published = sink.0.lock().unwrap();
    assert_eq!(published.len(), 4);
    let ids: Vec<u64> = published.iter().map(|a| a.alert_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let stats = session.stats();
    assert_eq!(stats.total_detections, 4);
    assert_eq!(stats.recorded_count, 2);
    assert_eq!(stats.skipped_same_behavior, 2);
    assert!((stats.dedup_rate - 0.5).abs() < 1e-9);
}

#[test]
fn behavior_change_on_a_track_is_recorded_immediately() {
    let mut session = default_session(SharedSink::default());
    let bbox = BBox::new(0.0, 0.0, 40.0, 40.0);
    let first = session
        .process_frame_at(
            &[Detection::new(5, "look_down", 0.6, bbox)],
            EvaluationContext::new("", T0),
            T0,
        )
        .unwrap();
    let second = session
        .process_frame_at(
            &[Detection::new(SLEEP, "sleep", 0.6, bbox)],
            EvaluationContext::new("", T0 + 2.0),
            T0 + 2.0,
        )
        .unwrap();
    assert_eq!(first.tracked[0].track_id, second.tracked[0].track_id);
    assert_eq!(second.tracked[0].reason, RecordReason::BehaviorChanged);
    assert!(second.tracked[0].recorded);
    assert_eq!(session.active_behavior_counts().get("sleep"), Some(&1));
    assert_eq!(session.active_behavior_counts().get("look_down"), None);
}

#[test]
fn empty_frames_produce_nothing() {
    let mut session = default_session(SharedSink::default());
    let report = session
        .process_frame_at(&[], EvaluationContext::new("", T0), T0)
        .unwrap();
    assert!(report.tracked.is_empty());
    assert!(report.alerts.is_empty());
    assert_eq!(session.stats().total_detections, 0);
}

#[test]
fn malformed_boxes_are_still_tracked_but_never_matched() {
    let mut session = default_session(SharedSink::default());
    let degenerate = Detection::new(5, "look_down", 0.6, BBox::new(10.0, 10.0, 10.0, 10.0));
    let a = session
        .process_frame_at(&[degenerate.clone()], EvaluationContext::new("", T0), T0)
        .unwrap();
    let b = session
        .process_frame_at(&[degenerate], EvaluationContext::new("", T0 + 1.0), T0 + 1.0)
        .unwrap();
    assert_ne!(a.tracked[0].track_id, b.tracked[0].track_id);
    assert!(b.tracked[0].recorded);
}
