//! Database layer for Oddswatch
//!
//! The pipeline talks to storage only through [`ObservationStore`]; the SQLite
//! implementation lives in [`sqlite`].

#[cfg(test)]
pub(crate) mod memory;
mod sqlite;

pub use sqlite::{database_path, SqliteStore};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::models::{Alert, NewAlert, Observation, ObservationSet, PayoutTable, RuleKind, SubjectKey};

/// Narrow storage interface consumed by the pipeline
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Append an observation, returning its id
    async fn insert_observation(&self, observation: &Observation) -> Result<i64>;

    /// Most recent observation for a subject
    async fn latest_observation(&self, key: &SubjectKey) -> Result<Option<Observation>>;

    /// Second most recent observation for a subject
    async fn previous_observation(&self, key: &SubjectKey) -> Result<Option<Observation>>;

    /// Append a payout table for a race, returning the number of rows written
    async fn insert_payouts(
        &self,
        source: &str,
        race: &str,
        observed_at: DateTime<Utc>,
        table: &PayoutTable,
    ) -> Result<usize>;

    /// Persist an alert, assigning its id
    async fn insert_alert(&self, alert: &NewAlert) -> Result<Alert>;

    /// Persist several alerts; each insert succeeds or fails on its own
    async fn insert_alerts(&self, alerts: &[NewAlert]) -> Vec<Result<Alert>> {
        let mut results = Vec::with_capacity(alerts.len());
        for alert in alerts {
            results.push(self.insert_alert(alert).await);
        }
        results
    }

    /// Alerts with the same rule and subject triggered after `since`
    async fn count_recent_alerts(
        &self,
        rule: RuleKind,
        key: &SubjectKey,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// Record successful delivery
    async fn mark_alert_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()>;

    /// Up to `limit` undelivered alerts, oldest first
    async fn unsent_alerts(&self, limit: i64) -> Result<Vec<Alert>>;

    /// Check connectivity
    async fn health_check(&self) -> Result<()>;
}

/// Shared store handle
pub type SharedStore = Arc<dyn ObservationStore>;

/// Persist every entry and the payout table of `set`, filling in observation ids
pub async fn persist_observation_set(
    store: &dyn ObservationStore,
    set: &mut ObservationSet,
) -> Result<()> {
    for entry in &mut set.entries {
        let id = store.insert_observation(entry).await?;
        entry.id = Some(id);
    }

    if let Some(table) = &set.payouts {
        store
            .insert_payouts(&set.source, &set.race, set.observed_at, table)
            .await?;
    }

    debug!(
        source = %set.source,
        race = %set.race,
        entries = set.entries.len(),
        "Persisted observation set"
    );

    Ok(())
}
