use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::RuleRecord;

/// Read-only supplier of rule definitions.
///
/// Sources are called on cache expiry only, never per frame. Errors mean the
/// store itself is unreadable or structurally corrupt; individual bad rules
/// are filtered during compilation instead.
pub trait RuleSource: Send + Sync {
    fn name(&self) -> &str;

    fn load_rules(&self) -> Result<Vec<RuleRecord>>;
}

/// Fixed in-memory rule list.
#[derive(Clone, Debug, Default)]
pub struct StaticRuleSource {
    records: Vec<RuleRecord>,
}

impl StaticRuleSource {
    pub fn new(records: Vec<RuleRecord>) -> Self {
        Self { records }
    }
}

impl RuleSource for StaticRuleSource {
    fn name(&self) -> &str {
        "static"
    }

    fn load_rules(&self) -> Result<Vec<RuleRecord>> {
        Ok(self.records.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleRecord>,
}

/// Rules document on disk: `{ "rules": [...] }` as JSON, or `[[rules]]`
/// tables when the path ends in `.toml`. The file is re-read on every load.
#[derive(Clone, Debug)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse(raw: &str, is_toml: bool) -> Result<Vec<RuleRecord>> {
        let file: RuleFile = if is_toml {
            toml::from_str(raw).map_err(|e| anyhow!("invalid rules toml: {}", e))?
        } else {
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid rules json: {}", e))?
        };
        Ok(file.rules)
    }
}

impl RuleSource for FileRuleSource {
    fn name(&self) -> &str {
        "file"
    }

    fn load_rules(&self) -> Result<Vec<RuleRecord>> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| anyhow!("failed to read rules file {}: {}", self.path.display(), e))?;
        let is_toml = self
            .path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        Self::parse(&raw, is_toml).map_err(|e| anyhow!("{}: {}", self.path.display(), e))
    }
}

/// Rules stored in a SQLite `behavior_rules` table.
///
/// A connection is opened per load so the source stays `Sync`. `file:` URIs
/// are opened in URI mode, which allows shared in-memory databases.
#[derive(Clone, Debug)]
pub struct SqliteRuleSource {
    db_path: String,
}

impl SqliteRuleSource {
    pub fn open(db_path: &str) -> Result<Self> {
        let source = Self {
            db_path: db_path.to_string(),
        };
        let conn = source.connect()?;
        ensure_schema(&conn)?;
        Ok(source)
    }

    fn connect(&self) -> Result<Connection> {
        if self.db_path.starts_with("file:") {
            return Ok(Connection::open_with_flags(
                &self.db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?);
        }
        Ok(Connection::open(&self.db_path)?)
    }

    /// Insert or replace one rule. Intended for seeding and admin tooling.
    pub fn upsert(&self, record: &RuleRecord) -> Result<()> {
        let conn = self.connect()?;
        let mut behaviors = record.behaviors.clone();
        if let Some(behavior) = &record.behavior {
            if !behaviors.contains(behavior) {
                behaviors.insert(0, behavior.clone());
            }
        }
        conn.execute(
            r#"
            INSERT OR REPLACE INTO behavior_rules
              (id, name, rule_type, behaviors_json, threshold, time_window,
               min_confidence, duration_seconds, alert_level, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.id,
                record.name,
                record.rule_type,
                serde_json::to_string(&behaviors)?,
                record.threshold,
                record.time_window,
                record.min_confidence,
                record.duration_seconds,
                record.alert_level,
                record.is_active,
            ],
        )?;
        Ok(())
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS behavior_rules (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          rule_type TEXT NOT NULL,
          behaviors_json TEXT NOT NULL DEFAULT '[]',
          threshold INTEGER,
          time_window REAL,
          min_confidence REAL,
          duration_seconds REAL,
          alert_level INTEGER,
          is_active INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )?;
    Ok(())
}

impl RuleSource for SqliteRuleSource {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn load_rules(&self) -> Result<Vec<RuleRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, rule_type, behaviors_json, threshold, time_window,
                   min_confidence, duration_seconds, alert_level, is_active
            FROM behavior_rules
            ORDER BY id ASC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let behaviors_json: String = row.get(3)?;
            let behaviors: Vec<String> = serde_json::from_str(&behaviors_json)
                .map_err(|e| anyhow!("corrupt behaviors_json for rule {}: {}", id, e))?;
            out.push(RuleRecord {
                id,
                name: row.get(1)?,
                rule_type: row.get(2)?,
                behavior: None,
                behaviors,
                threshold: row.get(4)?,
                time_window: row.get(5)?,
                min_confidence: row.get(6)?,
                duration_seconds: row.get(7)?,
                alert_level: row.get(8)?,
                is_active: row.get(9)?,
            });
        }
        Ok(out)
    }
}

/// Built-in rule set used when no store is configured.
pub fn default_rules() -> Vec<RuleRecord> {
    vec![
        RuleRecord {
            id: 1,
            name: "repeated talking".to_string(),
            rule_type: "frequency".to_string(),
            behavior: Some("talk".to_string()),
            threshold: Some(3),
            time_window: Some(120.0),
            min_confidence: Some(0.5),
            alert_level: Some(1),
            ..RuleRecord::default()
        },
        RuleRecord {
            id: 2,
            name: "phone in class".to_string(),
            rule_type: "threshold".to_string(),
            behavior: Some("phone".to_string()),
            threshold: Some(1),
            min_confidence: Some(0.6),
            alert_level: Some(2),
            ..RuleRecord::default()
        },
        RuleRecord {
            id: 3,
            name: "prolonged sleeping".to_string(),
            rule_type: "duration".to_string(),
            behavior: Some("sleep".to_string()),
            duration_seconds: Some(60.0),
            min_confidence: Some(0.5),
            alert_level: Some(3),
            ..RuleRecord::default()
        },
        RuleRecord {
            id: 4,
            name: "phone while chatting".to_string(),
            rule_type: "combination".to_string(),
            behaviors: vec!["phone".to_string(), "talk".to_string()],
            min_confidence: Some(0.5),
            alert_level: Some(2),
            ..RuleRecord::default()
        },
        RuleRecord {
            id: 5,
            name: "many heads down".to_string(),
            rule_type: "threshold".to_string(),
            behavior: Some("look_down".to_string()),
            threshold: Some(5),
            min_confidence: Some(0.5),
            alert_level: Some(1),
            ..RuleRecord::default()
        },
    ]
}
