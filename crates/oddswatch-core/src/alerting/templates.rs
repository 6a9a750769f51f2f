//! Message templates for single and batched alerts

use std::fmt::Write;

use super::notifier::Message;
use crate::models::{Alert, RuleKind};

const RULE: &str = "==================================================";
const SECTION: &str = "------------------------------";
const FOOTER: &str = "This is an automated alert from oddswatch.";

/// Lines shown per rule in a batch before collapsing
pub const BATCH_LINES_PER_RULE: usize = 5;

/// Renders alerts into outbound messages
#[derive(Debug, Clone)]
pub struct Templates {
    prefix: String,
}

impl Templates {
    /// Templates using `prefix` in every subject
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Subject for a single alert
    pub fn subject(&self, alert: &Alert) -> String {
        format!("{} {}", self.prefix, alert.rule.title())
    }

    /// Subject for a batch
    pub fn batch_subject(&self, count: usize) -> String {
        format!("{} {} New Alerts", self.prefix, count)
    }

    /// Message for one alert
    pub fn single(&self, alert: &Alert) -> Message {
        let mut body = String::new();
        let _ = writeln!(body, "{}", alert.rule.description());
        let _ = writeln!(body, "{RULE}");
        let _ = writeln!(body);
        let _ = writeln!(body, "Alert Details:");
        let _ = writeln!(body, "- Time: {}", alert.triggered_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(body, "- Message: {}", alert.message);
        let _ = writeln!(body, "- Threshold: {:.2}", alert.threshold_value);
        let _ = writeln!(body, "- Actual Value: {:.2}", alert.actual_value);
        let _ = writeln!(body, "- Source: {}", alert.key.source);
        let _ = writeln!(body, "- Race: {}", alert.key.race);
        let _ = writeln!(body, "- Subject: {}", alert.key.subject);
        let _ = writeln!(body);
        let _ = writeln!(body, "{RULE}");
        body.push_str(FOOTER);

        Message {
            subject: self.subject(alert),
            body,
        }
    }

    /// One message covering every alert in `alerts`, grouped by rule
    pub fn batch(&self, alerts: &[Alert]) -> Message {
        let groups = group_by_rule(alerts);

        let mut body = String::new();
        let _ = writeln!(body, "Multiple Alerts Triggered");
        let _ = writeln!(body, "{RULE}");
        let _ = writeln!(body);
        let _ = writeln!(body, "You have {} new alerts:", alerts.len());

        for (rule, group) in &groups {
            let _ = writeln!(body);
            let _ = writeln!(body, "{} ({} alerts):", rule.title(), group.len());
            let _ = writeln!(body, "{SECTION}");
            for alert in group.iter().take(BATCH_LINES_PER_RULE) {
                let _ = writeln!(
                    body,
                    "  - {} - {}",
                    alert.triggered_at.format("%H:%M:%S"),
                    alert.message
                );
            }
            if group.len() > BATCH_LINES_PER_RULE {
                let _ = writeln!(body, "  ... and {} more", group.len() - BATCH_LINES_PER_RULE);
            }
        }

        if let (Some(first), Some(last)) = (alerts.first(), alerts.last()) {
            let rules: Vec<&str> = groups.iter().map(|(rule, _)| rule.as_str()).collect();
            let _ = writeln!(body);
            let _ = writeln!(body, "{RULE}");
            let _ = writeln!(body, "Summary:");
            let _ = writeln!(body, "- Total Alerts: {}", alerts.len());
            let _ = writeln!(
                body,
                "- Time Range: {} - {}",
                first.triggered_at.format("%H:%M"),
                last.triggered_at.format("%H:%M")
            );
            let _ = writeln!(body, "- Alert Types: {}", rules.join(", "));
        }

        let _ = writeln!(body);
        body.push_str(FOOTER);

        Message {
            subject: self.batch_subject(alerts.len()),
            body,
        }
    }
}

/// Alerts grouped by rule, groups in order of first appearance
fn group_by_rule(alerts: &[Alert]) -> Vec<(RuleKind, Vec<&Alert>)> {
    let mut groups: Vec<(RuleKind, Vec<&Alert>)> = Vec::new();
    for alert in alerts {
        match groups.iter_mut().find(|(rule, _)| *rule == alert.rule) {
            Some((_, group)) => group.push(alert),
            None => groups.push((alert.rule, vec![alert])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubjectKey;
    use chrono::{Duration, TimeZone, Utc};

    fn alert(id: i64, rule: RuleKind, minutes: i64) -> Alert {
        Alert {
            id,
            triggered_at: Utc.with_ymd_and_hms(2026, 10, 16, 13, 0, 0).unwrap()
                + Duration::minutes(minutes),
            key: SubjectKey::new("Test Track", "2026-10-16-R1", id.to_string()),
            rule,
            threshold_value: 1.5,
            actual_value: 1.25,
            message: format!("alert {id}"),
            sent: false,
            sent_at: None,
        }
    }

    #[test]
    fn test_single_message() {
        let templates = Templates::new("[Odds Alert]");
        let message = templates.single(&alert(1, RuleKind::WinOddsLow, 0));

        assert_eq!(message.subject, "[Odds Alert] Win Odds Low");
        assert!(message.body.starts_with("Low Win Odds Alert\n"));
        assert!(message.body.contains("- Time: 2026-10-16 13:00:00"));
        assert!(message.body.contains("- Message: alert 1"));
        assert!(message.body.contains("- Threshold: 1.50"));
        assert!(message.body.contains("- Actual Value: 1.25"));
        assert!(message.body.contains("- Race: 2026-10-16-R1"));
    }

    #[test]
    fn test_batch_groups_and_collapses() {
        let templates = Templates::new("[Odds Alert]");
        let mut alerts: Vec<Alert> = (1..=7).map(|i| alert(i, RuleKind::OddsChange, i)).collect();
        alerts.push(alert(8, RuleKind::ExactaHigh, 20));

        let message = templates.batch(&alerts);
        assert_eq!(message.subject, "[Odds Alert] 8 New Alerts");
        assert!(message.body.contains("You have 8 new alerts:"));
        assert!(message.body.contains("Odds Change (7 alerts):"));
        assert!(message.body.contains("Exacta High (1 alerts):"));
        assert!(message.body.contains("alert 5"));
        assert!(!message.body.contains("alert 6"));
        assert!(message.body.contains("  ... and 2 more"));
        assert!(message.body.contains("- Total Alerts: 8"));
        assert!(message.body.contains("- Time Range: 13:01 - 13:20"));
        assert!(message.body.contains("- Alert Types: odds_change, exacta_high"));
    }

    #[test]
    fn test_batch_without_overflow_has_no_more_line() {
        let templates = Templates::new("[Odds Alert]");
        let alerts = vec![alert(1, RuleKind::WinOddsLow, 0), alert(2, RuleKind::WinOddsHigh, 1)];
        let message = templates.batch(&alerts);
        assert!(!message.body.contains("more"));
    }
}
