//! Turns a persisted observation set into stored alerts

use tracing::{debug, error, info, warn};

use super::evaluator::{EvaluatorCatalog, Target};
use super::suppressor::Suppressor;
use crate::clock::SharedClock;
use crate::config::AlertingConfig;
use crate::db::SharedStore;
use crate::models::{Alert, AlertCandidate, AlertContext, NewAlert, ObservationSet, SubjectKey};

/// Runs the evaluator catalog over observation sets
pub struct AlertEngine {
    enabled: bool,
    catalog: EvaluatorCatalog,
    suppressor: Suppressor,
    store: SharedStore,
    max_alerts_per_race: usize,
}

impl AlertEngine {
    /// Create an engine from alerting configuration
    pub fn new(config: &AlertingConfig, store: SharedStore, clock: SharedClock) -> Self {
        let catalog = EvaluatorCatalog::from_config(config);
        if config.enabled {
            info!(evaluators = catalog.evaluators().len(), "Alert engine ready");
        } else {
            info!("Alerting disabled");
        }

        Self {
            enabled: config.enabled,
            catalog,
            suppressor: Suppressor::new(store.clone(), clock, config.suppression_window()),
            store,
            max_alerts_per_race: config.max_alerts_per_race,
        }
    }

    /// Evaluate `set`, which must already be persisted, and return the alerts stored for it
    pub async fn evaluate_batch(&self, set: &ObservationSet) -> Vec<Alert> {
        if !self.enabled {
            return Vec::new();
        }

        let mut candidates = self.entry_candidates(set).await;
        candidates.extend(self.payout_candidates(set));

        if candidates.len() > self.max_alerts_per_race {
            warn!(
                source = %set.source,
                race = %set.race,
                candidates = candidates.len(),
                max = self.max_alerts_per_race,
                "Too many alerts for one race; dropping the rest"
            );
            candidates.truncate(self.max_alerts_per_race);
        }

        let mut accepted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !self.suppressor.is_suppressed(&candidate).await {
                info!(rule = %candidate.rule, key = %candidate.context.key, "Alert triggered: {}", candidate.message);
                accepted.push(NewAlert::from(candidate));
            }
        }

        if accepted.is_empty() {
            return Vec::new();
        }

        let results = self.store.insert_alerts(&accepted).await;
        accepted
            .iter()
            .zip(results)
            .filter_map(|(new, result)| match result {
                Ok(alert) => Some(alert),
                Err(e) => {
                    error!(rule = %new.rule, key = %new.key, error = %e, "Failed to store alert");
                    None
                }
            })
            .collect()
    }

    async fn entry_candidates(&self, set: &ObservationSet) -> Vec<AlertCandidate> {
        let mut candidates = Vec::new();

        for entry in &set.entries {
            let previous = match self.store.previous_observation(&entry.key).await {
                Ok(previous) => previous.and_then(|o| o.value),
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Previous observation lookup failed");
                    None
                }
            };

            let context = AlertContext {
                key: entry.key.clone(),
                label: entry.label.clone(),
                timestamp: set.observed_at,
            };

            candidates.extend(
                self.catalog
                    .for_target(Target::Entry)
                    .filter_map(|evaluator| evaluator.evaluate(entry.value, previous, &context)),
            );
        }

        candidates
    }

    fn payout_candidates(&self, set: &ObservationSet) -> Vec<AlertCandidate> {
        let Some(table) = &set.payouts else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for (combination, payout) in &table.payouts {
            let context = AlertContext {
                key: SubjectKey::new(&set.source, &set.race, combination),
                label: combination.clone(),
                timestamp: set.observed_at,
            };
            candidates.extend(
                self.catalog
                    .for_target(Target::Combination)
                    .filter_map(|evaluator| evaluator.evaluate(Some(*payout), None, &context)),
            );
        }

        debug!(source = %set.source, race = %set.race, candidates = candidates.len(), "Evaluated payouts");
        candidates
    }
}
