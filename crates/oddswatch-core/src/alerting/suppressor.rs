//! Duplicate alert suppression
//!
//! Two tiers: an in-memory map of recently seen fingerprints, then the store's
//! alert history for the same rule and subject. Either tier finding a match inside
//! the window suppresses the candidate.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::db::SharedStore;
use crate::models::AlertCandidate;

/// Stable identity of a candidate: rule, subject and threshold, not the observed value
pub fn fingerprint(candidate: &AlertCandidate) -> String {
    let key = &candidate.context.key;
    let raw = format!(
        "{}:{}:{}:{}:{}",
        candidate.rule, key.source, key.race, key.subject, candidate.threshold_value
    );
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Sliding-window deduplication of alert candidates
pub struct Suppressor {
    store: SharedStore,
    clock: SharedClock,
    window: Duration,
    recent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Suppressor {
    /// Create a suppressor with the given window
    pub fn new(store: SharedStore, clock: SharedClock, window: Duration) -> Self {
        Self {
            store,
            clock,
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `candidate` duplicates a recent alert. A candidate that is not
    /// suppressed is recorded, so an identical one inside the window will be.
    pub async fn is_suppressed(&self, candidate: &AlertCandidate) -> bool {
        let fingerprint = fingerprint(candidate);
        let now = self.clock.now();

        if self.seen_recently(&fingerprint, now) {
            debug!(rule = %candidate.rule, key = %candidate.context.key, "Suppressed by cache");
            return true;
        }

        let since = now - self.window;
        let in_history = match self
            .store
            .count_recent_alerts(candidate.rule, &candidate.context.key, since)
            .await
        {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(
                    rule = %candidate.rule,
                    key = %candidate.context.key,
                    error = %e,
                    "Alert history lookup failed; treating as not found"
                );
                false
            }
        };

        if in_history {
            debug!(rule = %candidate.rule, key = %candidate.context.key, "Suppressed by history");
            return true;
        }

        // Another caller may have recorded the fingerprint while the store was queried
        let mut recent = self.recent.lock();
        if let Some(last_seen) = recent.get(&fingerprint) {
            if now - *last_seen < self.window {
                return true;
            }
        }
        recent.insert(fingerprint, now);
        false
    }

    /// Number of fingerprints currently cached
    pub fn cached(&self) -> usize {
        self.recent.lock().len()
    }

    fn seen_recently(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let mut recent = self.recent.lock();
        let window = self.window;
        recent.retain(|_, last_seen| now - *last_seen < window);
        recent.contains_key(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::memory::MemoryStore;
    use crate::db::ObservationStore;
    use crate::models::{AlertContext, NewAlert, RuleKind, SubjectKey};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn candidate(subject: &str, actual: f64) -> AlertCandidate {
        AlertCandidate {
            rule: RuleKind::WinOddsLow,
            message: format!("odds dropped to {actual}"),
            threshold_value: 1.5,
            actual_value: actual,
            context: AlertContext {
                key: SubjectKey::new("Test Track", "2026-10-16-R1", subject),
                label: "Thunder Bolt".to_string(),
                timestamp: start(),
            },
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, Suppressor) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let suppressor = Suppressor::new(store.clone(), clock.clone(), Duration::seconds(300));
        (store, clock, suppressor)
    }

    #[test]
    fn test_fingerprint_ignores_observed_value() {
        assert_eq!(fingerprint(&candidate("1", 1.2)), fingerprint(&candidate("1", 1.1)));
        assert_ne!(fingerprint(&candidate("1", 1.2)), fingerprint(&candidate("2", 1.2)));

        let mut other_threshold = candidate("1", 1.2);
        other_threshold.threshold_value = 2.0;
        assert_ne!(fingerprint(&candidate("1", 1.2)), fingerprint(&other_threshold));

        assert_eq!(fingerprint(&candidate("1", 1.2)).len(), 64);
    }

    #[tokio::test]
    async fn test_second_identical_candidate_is_suppressed() {
        let (_, _, suppressor) = setup();
        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);
        assert!(suppressor.is_suppressed(&candidate("1", 1.1)).await);
        assert_eq!(suppressor.cached(), 1);
    }

    #[tokio::test]
    async fn test_distinct_subjects_are_independent() {
        let (_, _, suppressor) = setup();
        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);
        assert!(!suppressor.is_suppressed(&candidate("2", 1.2)).await);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let (_, clock, suppressor) = setup();
        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);

        clock.advance(Duration::seconds(299));
        assert!(suppressor.is_suppressed(&candidate("1", 1.2)).await);

        clock.advance(Duration::seconds(2));
        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged() {
        let (_, clock, suppressor) = setup();
        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);
        assert!(!suppressor.is_suppressed(&candidate("2", 1.2)).await);
        assert_eq!(suppressor.cached(), 2);

        clock.advance(Duration::seconds(301));
        assert!(!suppressor.is_suppressed(&candidate("3", 1.2)).await);
        assert_eq!(suppressor.cached(), 1);
    }

    #[tokio::test]
    async fn test_history_suppresses_after_restart() {
        let (store, clock, suppressor) = setup();
        store
            .insert_alert(&NewAlert::from(candidate("1", 1.2)))
            .await
            .unwrap();

        clock.advance(Duration::seconds(60));
        assert!(suppressor.is_suppressed(&candidate("1", 1.1)).await);
        assert_eq!(store.count_calls(), 1);

        clock.advance(Duration::seconds(300));
        assert!(!suppressor.is_suppressed(&candidate("1", 1.1)).await);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let (store, _, suppressor) = setup();
        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);
        assert!(suppressor.is_suppressed(&candidate("1", 1.2)).await);
        assert_eq!(store.count_calls(), 1);
    }

    #[tokio::test]
    async fn test_store_error_is_treated_as_not_found() {
        let (store, _, suppressor) = setup();
        store.fail_alert_counts(true);

        assert!(!suppressor.is_suppressed(&candidate("1", 1.2)).await);
        assert!(suppressor.is_suppressed(&candidate("1", 1.2)).await);
    }
}
