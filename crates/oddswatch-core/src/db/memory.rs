//! In-memory store used by unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::ObservationStore;
use crate::error::{Error, Result};
use crate::models::{Alert, NewAlert, Observation, PayoutTable, RuleKind, SubjectKey};

#[derive(Default)]
struct Tables {
    observations: Vec<Observation>,
    payouts: Vec<(String, String, DateTime<Utc>, PayoutTable)>,
    alerts: Vec<Alert>,
}

/// Vec-backed store with failure injection
#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
    failing_alert_subjects: Mutex<HashSet<String>>,
    fail_previous: Mutex<bool>,
    fail_counts: Mutex<bool>,
    fail_observations: Mutex<bool>,
    count_calls: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `insert_alert` fail for alerts on `subject`
    pub(crate) fn fail_alert_inserts_for(&self, subject: &str) {
        self.failing_alert_subjects.lock().insert(subject.to_string());
    }

    pub(crate) fn fail_previous_lookups(&self, fail: bool) {
        *self.fail_previous.lock() = fail;
    }

    pub(crate) fn fail_alert_counts(&self, fail: bool) {
        *self.fail_counts.lock() = fail;
    }

    pub(crate) fn fail_observation_inserts(&self, fail: bool) {
        *self.fail_observations.lock() = fail;
    }

    pub(crate) fn alerts(&self) -> Vec<Alert> {
        self.tables.lock().alerts.clone()
    }

    pub(crate) fn observations(&self) -> Vec<Observation> {
        self.tables.lock().observations.clone()
    }

    pub(crate) fn payout_snapshots(&self) -> usize {
        self.tables.lock().payouts.len()
    }

    pub(crate) fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    fn nth_latest(&self, key: &SubjectKey, n: usize) -> Option<Observation> {
        let tables = self.tables.lock();
        let mut matching: Vec<&Observation> = tables
            .observations
            .iter()
            .filter(|o| &o.key == key)
            .collect();
        matching.sort_by(|a, b| b.observed_at.cmp(&a.observed_at).then(b.id.cmp(&a.id)));
        matching.get(n).map(|o| (*o).clone())
    }
}

fn injected(what: &str) -> Error {
    Error::Database(sqlx::Error::Protocol(format!("injected {what} failure")))
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        if *self.fail_observations.lock() {
            return Err(injected("observation insert"));
        }
        let mut tables = self.tables.lock();
        let id = tables.observations.len() as i64 + 1;
        let mut stored = observation.clone();
        stored.id = Some(id);
        tables.observations.push(stored);
        Ok(id)
    }

    async fn latest_observation(&self, key: &SubjectKey) -> Result<Option<Observation>> {
        Ok(self.nth_latest(key, 0))
    }

    async fn previous_observation(&self, key: &SubjectKey) -> Result<Option<Observation>> {
        if *self.fail_previous.lock() {
            return Err(injected("previous lookup"));
        }
        Ok(self.nth_latest(key, 1))
    }

    async fn insert_payouts(
        &self,
        source: &str,
        race: &str,
        observed_at: DateTime<Utc>,
        table: &PayoutTable,
    ) -> Result<usize> {
        self.tables.lock().payouts.push((
            source.to_string(),
            race.to_string(),
            observed_at,
            table.clone(),
        ));
        Ok(table.payouts.len())
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<Alert> {
        if self.failing_alert_subjects.lock().contains(&alert.key.subject) {
            return Err(injected("alert insert"));
        }
        let mut tables = self.tables.lock();
        let id = tables.alerts.len() as i64 + 1;
        let stored = Alert::from_new(id, alert.clone());
        tables.alerts.push(stored.clone());
        Ok(stored)
    }

    async fn count_recent_alerts(
        &self,
        rule: RuleKind,
        key: &SubjectKey,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_counts.lock() {
            return Err(injected("alert count"));
        }
        let count = self
            .tables
            .lock()
            .alerts
            .iter()
            .filter(|a| a.rule == rule && &a.key == key && a.triggered_at > since)
            .count();
        Ok(count as i64)
    }

    async fn mark_alert_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock();
        if let Some(alert) = tables.alerts.iter_mut().find(|a| a.id == id && !a.sent) {
            alert.sent = true;
            alert.sent_at = Some(sent_at);
        }
        Ok(())
    }

    async fn unsent_alerts(&self, limit: i64) -> Result<Vec<Alert>> {
        let mut unsent: Vec<Alert> = self
            .tables
            .lock()
            .alerts
            .iter()
            .filter(|a| !a.sent)
            .cloned()
            .collect();
        unsent.sort_by(|a, b| a.triggered_at.cmp(&b.triggered_at).then(a.id.cmp(&b.id)));
        unsent.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(unsent)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
