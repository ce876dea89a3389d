use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alerts::{AlertAggregator, BehaviorCategories, SuggestionBook};
use crate::dedup::DedupConfig;
use crate::rules::{
    default_rules, FileRuleSource, RuleEngine, RuleSource, SqliteRuleSource, StaticRuleSource,
    DEFAULT_RULE_TTL_SECS,
};
use crate::tracker::TrackerConfig;
use crate::validate_behavior_name;

/// Hard ceiling for `max_tracked_objects`.
const MAX_TRACKED_OBJECTS_CEILING: usize = 10_000;
/// Hard ceiling for `max_lost_frames`.
const MAX_LOST_FRAMES_CEILING: u64 = 10_000;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    tracker: Option<TrackerConfigFile>,
    dedup: Option<DedupConfigFile>,
    rules: Option<RulesConfigFile>,
    categories: Option<CategoriesConfigFile>,
    suggestions: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    iou_threshold: Option<f32>,
    max_lost_frames: Option<u64>,
    max_tracked_objects: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    default_cooldown_secs: Option<f64>,
    cooldowns: Option<HashMap<String, f64>>,
    stationary_iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RulesConfigFile {
    ttl_secs: Option<f64>,
    path: Option<PathBuf>,
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CategoriesConfigFile {
    severe: Option<Vec<String>>,
    moderate: Option<Vec<String>>,
    mild: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub tracker: TrackerConfig,
    pub dedup: DedupConfig,
    pub rules: RuleSettings,
    pub categories: BehaviorCategories,
    /// Per-behavior suggestion replacements. An empty list removes the
    /// behavior's templates.
    pub suggestions: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct RuleSettings {
    pub ttl_s: f64,
    /// JSON or TOML rule file. Takes precedence over `db_path`.
    pub path: Option<PathBuf>,
    pub db_path: Option<String>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        // Defaults never fail to build.
        Self::from_file(SentinelConfigFile::default())
    }
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file, skipping the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let tracker_file = file.tracker.unwrap_or_default();
        let defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            iou_threshold: tracker_file.iou_threshold.unwrap_or(defaults.iou_threshold),
            max_lost_frames: tracker_file
                .max_lost_frames
                .unwrap_or(defaults.max_lost_frames),
            max_tracked_objects: tracker_file
                .max_tracked_objects
                .unwrap_or(defaults.max_tracked_objects),
        };

        let dedup_file = file.dedup.unwrap_or_default();
        let dedup_defaults = DedupConfig::default();
        let dedup = DedupConfig {
            default_cooldown_s: dedup_file
                .default_cooldown_secs
                .unwrap_or(dedup_defaults.default_cooldown_s),
            cooldowns: dedup_file.cooldowns.unwrap_or_default(),
            stationary_iou: dedup_file
                .stationary_iou
                .unwrap_or(dedup_defaults.stationary_iou),
        };

        let rules_file = file.rules.unwrap_or_default();
        let rules = RuleSettings {
            ttl_s: rules_file.ttl_secs.unwrap_or(DEFAULT_RULE_TTL_SECS),
            path: rules_file.path,
            db_path: rules_file.db_path,
        };

        let categories_file = file.categories.unwrap_or_default();
        let category_defaults = BehaviorCategories::default();
        let categories = BehaviorCategories {
            severe: categories_file.severe.unwrap_or(category_defaults.severe),
            moderate: categories_file
                .moderate
                .unwrap_or(category_defaults.moderate),
            mild: categories_file.mild.unwrap_or(category_defaults.mild),
        };

        Self {
            tracker,
            dedup,
            rules,
            categories,
            suggestions: file.suggestions.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_parse::<f32>("SENTINEL_IOU_THRESHOLD", "a number")? {
            self.tracker.iou_threshold = value;
        }
        if let Some(value) = env_parse::<u64>("SENTINEL_MAX_LOST_FRAMES", "an integer")? {
            self.tracker.max_lost_frames = value;
        }
        if let Some(value) = env_parse::<usize>("SENTINEL_MAX_TRACKED_OBJECTS", "an integer")? {
            self.tracker.max_tracked_objects = value;
        }
        if let Some(value) =
            env_parse::<f64>("SENTINEL_DEFAULT_COOLDOWN_SECS", "a number of seconds")?
        {
            self.dedup.default_cooldown_s = value;
        }
        if let Some(value) = env_parse::<f64>("SENTINEL_RULE_TTL_SECS", "a number of seconds")? {
            self.rules.ttl_s = value;
        }
        if let Ok(path) = std::env::var("SENTINEL_RULES_PATH") {
            if !path.trim().is_empty() {
                self.rules.path = Some(PathBuf::from(path));
            }
        }
        if let Ok(db) = std::env::var("SENTINEL_RULES_DB") {
            if !db.trim().is_empty() {
                self.rules.db_path = Some(db);
            }
        }
        Ok(())
    }

    /// Clamp tunables into range and reject malformed behavior names.
    pub fn validate(&mut self) -> Result<()> {
        let t = &mut self.tracker;
        if !t.iou_threshold.is_finite() {
            return Err(anyhow!("tracker.iou_threshold must be a finite number"));
        }
        t.iou_threshold = t.iou_threshold.clamp(0.0, 1.0);
        if t.max_tracked_objects == 0 {
            return Err(anyhow!("tracker.max_tracked_objects must be greater than zero"));
        }
        t.max_tracked_objects = t.max_tracked_objects.min(MAX_TRACKED_OBJECTS_CEILING);
        t.max_lost_frames = t.max_lost_frames.min(MAX_LOST_FRAMES_CEILING);

        for behavior in self.dedup.cooldowns.keys() {
            validate_behavior_name(behavior)?;
        }
        self.dedup = std::mem::take(&mut self.dedup).sanitized();

        if !self.rules.ttl_s.is_finite() || self.rules.ttl_s < 0.0 {
            self.rules.ttl_s = DEFAULT_RULE_TTL_SECS;
        }

        self.categories.validate()?;
        // Keys may be combination labels such as `phone+talk`.
        for label in self.suggestions.keys() {
            for behavior in label.split('+') {
                validate_behavior_name(behavior)?;
            }
        }
        Ok(())
    }

    /// Rule file first, then database, then the built-in default set.
    pub fn rule_source(&self) -> Result<Box<dyn RuleSource>> {
        if let Some(path) = &self.rules.path {
            return Ok(Box::new(FileRuleSource::new(path.clone())));
        }
        if let Some(db) = &self.rules.db_path {
            return Ok(Box::new(SqliteRuleSource::open(db)?));
        }
        Ok(Box::new(StaticRuleSource::new(default_rules())))
    }

    pub fn build_engine(&self) -> Result<Arc<RuleEngine>> {
        Ok(Arc::new(RuleEngine::new(self.rule_source()?, self.rules.ttl_s)))
    }

    pub fn suggestion_book(&self) -> SuggestionBook {
        SuggestionBook::with_overrides(&self.suggestions)
    }

    /// Shared aggregator over a freshly built engine.
    pub fn build_aggregator(&self) -> Result<Arc<AlertAggregator>> {
        let aggregator = AlertAggregator::new(self.build_engine()?)
            .with_suggestions(self.suggestion_book())
            .with_categories(self.categories.clone());
        Ok(Arc::new(aggregator))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, what: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, what)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
