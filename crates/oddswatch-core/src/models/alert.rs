//! Alert data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SubjectKey;
use crate::error::Error;

/// Rule identifiers of the fixed evaluator catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Win odds fell below the configured minimum
    WinOddsLow,
    /// Win odds rose above the configured maximum
    WinOddsHigh,
    /// Win odds moved by at least the configured percentage between polls
    OddsChange,
    /// Exacta payout fell below the configured minimum
    ExactaLow,
    /// Exacta payout rose above the configured maximum
    ExactaHigh,
}

impl RuleKind {
    /// Every rule in the catalog
    pub const ALL: [RuleKind; 5] = [
        RuleKind::WinOddsLow,
        RuleKind::WinOddsHigh,
        RuleKind::OddsChange,
        RuleKind::ExactaLow,
        RuleKind::ExactaHigh,
    ];

    /// Stable identifier stored with alerts
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::WinOddsLow => "win_odds_low",
            RuleKind::WinOddsHigh => "win_odds_high",
            RuleKind::OddsChange => "odds_change",
            RuleKind::ExactaLow => "exacta_low",
            RuleKind::ExactaHigh => "exacta_high",
        }
    }

    /// Title case name, used in message subjects
    pub fn title(self) -> &'static str {
        match self {
            RuleKind::WinOddsLow => "Win Odds Low",
            RuleKind::WinOddsHigh => "Win Odds High",
            RuleKind::OddsChange => "Odds Change",
            RuleKind::ExactaLow => "Exacta Low",
            RuleKind::ExactaHigh => "Exacta High",
        }
    }

    /// Longer description, used in message bodies
    pub fn description(self) -> &'static str {
        match self {
            RuleKind::WinOddsLow => "Low Win Odds Alert",
            RuleKind::WinOddsHigh => "High Win Odds Alert",
            RuleKind::OddsChange => "Significant Odds Change",
            RuleKind::ExactaLow => "Low Exacta Payout",
            RuleKind::ExactaHigh => "High Exacta Payout",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleKind::ALL
            .into_iter()
            .find(|rule| rule.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown rule '{s}'")))
    }
}

/// Where and when a candidate was raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    /// Source, race and subject identifiers
    pub key: SubjectKey,

    /// Human readable subject label
    pub label: String,

    /// Observation timestamp
    pub timestamp: DateTime<Utc>,
}

/// Transient output of an evaluator, promoted to an [`Alert`] only after suppression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    /// Rule that fired
    pub rule: RuleKind,

    /// Human-readable message
    pub message: String,

    /// The bound or percentage that was crossed
    pub threshold_value: f64,

    /// The value that crossed it
    pub actual_value: f64,

    /// Evaluation context
    pub context: AlertContext,
}

/// An alert ready to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    /// When the alert condition was observed
    pub triggered_at: DateTime<Utc>,

    /// Source, race and subject identifiers
    pub key: SubjectKey,

    /// Rule that fired
    pub rule: RuleKind,

    /// The threshold that was crossed
    pub threshold_value: f64,

    /// The observed value
    pub actual_value: f64,

    /// Human-readable message
    pub message: String,
}

impl From<AlertCandidate> for NewAlert {
    fn from(candidate: AlertCandidate) -> Self {
        Self {
            triggered_at: candidate.context.timestamp,
            key: candidate.context.key,
            rule: candidate.rule,
            threshold_value: candidate.threshold_value,
            actual_value: candidate.actual_value,
            message: candidate.message,
        }
    }
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Store identifier
    pub id: i64,

    /// When the alert condition was observed
    pub triggered_at: DateTime<Utc>,

    /// Source, race and subject identifiers
    pub key: SubjectKey,

    /// Rule that fired
    pub rule: RuleKind,

    /// The threshold that was crossed
    pub threshold_value: f64,

    /// The observed value
    pub actual_value: f64,

    /// Human-readable message
    pub message: String,

    /// Whether delivery succeeded
    pub sent: bool,

    /// When delivery succeeded
    pub sent_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Build the persisted form of `alert` once the store assigned `id`
    pub fn from_new(id: i64, alert: NewAlert) -> Self {
        Self {
            id,
            triggered_at: alert.triggered_at,
            key: alert.key,
            rule: alert.rule,
            threshold_value: alert.threshold_value,
            actual_value: alert.actual_value,
            message: alert.message,
            sent: false,
            sent_at: None,
        }
    }

    /// Delivery timestamp for `now`, never earlier than the trigger time
    pub fn delivery_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(self.triggered_at)
    }
}
