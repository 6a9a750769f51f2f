//! Observation models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one measured subject: a runner within a race at a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    /// Tracked source name
    pub source: String,
    /// Race identifier within the source
    pub race: String,
    /// Subject identifier within the race (program number)
    pub subject: String,
}

impl SubjectKey {
    /// Create a subject key
    pub fn new(
        source: impl Into<String>,
        race: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            race: race.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.race, self.subject)
    }
}

/// One measured value for one subject at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Store identifier, `None` until persisted
    pub id: Option<i64>,

    /// Subject measured
    pub key: SubjectKey,

    /// Human readable subject label (runner name)
    pub label: String,

    /// Decimal win odds
    pub value: Option<f64>,

    /// Amount wagered on the subject in the win pool
    pub pool_amount: Option<i64>,

    /// Total win pool for the race
    pub total_pool: Option<i64>,

    /// When the value was observed
    pub observed_at: DateTime<Utc>,
}

/// Combination payouts for a race (exacta probables)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayoutTable {
    /// Total pool for the bet type
    pub total_pool: Option<i64>,

    /// Payout per combination key (`"1-2"`)
    pub payouts: BTreeMap<String, f64>,
}

/// Everything observed for one race in one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    /// Tracked source name
    pub source: String,

    /// Race identifier within the source
    pub race: String,

    /// Poll timestamp shared by every observation in the set
    pub observed_at: DateTime<Utc>,

    /// Per-subject observations
    pub entries: Vec<Observation>,

    /// Combination payouts, when fetched
    pub payouts: Option<PayoutTable>,
}

impl ObservationSet {
    /// Create an empty set
    pub fn new(source: impl Into<String>, race: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            race: race.into(),
            observed_at,
            entries: Vec::new(),
            payouts: None,
        }
    }

    /// Whether the set carries no data at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
            && self
                .payouts
                .as_ref()
                .map_or(true, |table| table.payouts.is_empty())
    }
}
