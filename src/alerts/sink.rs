use anyhow::{anyhow, Result};
use std::io::Write;

use super::Alert;

/// Receiver for finished alerts (persistence, notification fan-out).
pub trait AlertSink {
    fn publish(&mut self, alerts: &[Alert]) -> Result<()>;
}

/// Keeps alerts in memory. Used by tests and short-lived tooling.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: Vec<Alert>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn unread(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| !a.is_read)
    }

    /// The read flag is the only field that changes after publication.
    pub fn mark_read(&mut self, alert_id: u64) -> Result<()> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id)
            .ok_or_else(|| anyhow!("alert {} not found", alert_id))?;
        alert.is_read = true;
        Ok(())
    }
}

impl AlertSink for InMemoryAlertSink {
    fn publish(&mut self, alerts: &[Alert]) -> Result<()> {
        self.alerts.extend_from_slice(alerts);
        Ok(())
    }
}

/// Writes one JSON object per alert per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> AlertSink for JsonLinesSink<W> {
    fn publish(&mut self, alerts: &[Alert]) -> Result<()> {
        for alert in alerts {
            serde_json::to_writer(&mut self.out, alert)?;
            self.out.write_all(b"\n")?;
            self.written += 1;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlertLevel;
    use std::collections::BTreeSet;

    fn alert(id: u64) -> Alert {
        Alert {
            alert_id: id,
            session_id: "s".to_string(),
            alert_level: AlertLevel::Mild,
            alert_type: "threshold".to_string(),
            behavior: "talk".to_string(),
            behavior_count: 1,
            confidence: 0.8,
            location_info: vec![],
            triggered_rules: BTreeSet::from([1]),
            suggestions: vec![],
            created_at: 0.0,
            is_read: false,
        }
    }

    #[test]
    fn mark_read_flips_only_the_flag() {
        let mut sink = InMemoryAlertSink::new();
        sink.publish(&[alert(1), alert(2)]).unwrap();
        sink.mark_read(2).unwrap();
        assert_eq!(sink.unread().count(), 1);
        let mut expected = alert(2);
        expected.is_read = true;
        assert_eq!(sink.alerts()[1], expected);
        assert!(sink.mark_read(99).is_err());
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_alert() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish(&[alert(1), alert(2)]).unwrap();
        assert_eq!(sink.written(), 2);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: Alert = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back.alert_id, 1);
        assert_eq!(back.alert_level, AlertLevel::Mild);
    }
}
