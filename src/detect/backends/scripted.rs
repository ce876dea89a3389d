use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::BufRead;

use crate::detect::backend::DetectionSource;
use crate::detect::result::Detection;

/// Replays pre-recorded detection lists, one per frame.
///
/// Used by the replay tool and by tests standing in for a live model.
pub struct ScriptedSource {
    frames: VecDeque<Vec<Detection>>,
}

/// One line of a JSON-lines capture: either a bare detection array or an
/// object with a `detections` field.
#[derive(Deserialize)]
#[serde(untagged)]
enum FrameLine {
    Bare(Vec<Detection>),
    Wrapped { detections: Vec<Detection> },
}

impl ScriptedSource {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// Parse newline-delimited JSON frames. Blank lines are skipped.
    pub fn from_json_lines<R: BufRead>(reader: R) -> Result<Self> {
        let mut frames = VecDeque::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: FrameLine = serde_json::from_str(&line)
                .map_err(|e| anyhow!("invalid frame on line {}: {}", idx + 1, e))?;
            frames.push_back(match parsed {
                FrameLine::Bare(d) => d,
                FrameLine::Wrapped { detections } => detections,
            });
        }
        Ok(Self { frames })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn next_frame(&mut self) -> Result<Option<Vec<Detection>>> {
        Ok(self.frames.pop_front())
    }
}
