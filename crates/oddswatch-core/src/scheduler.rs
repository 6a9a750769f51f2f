//! Polling scheduler
//!
//! Each cycle polls the sources that are due, feeds the results through the
//! alert engine and the notification manager, flushes batched and unsent alerts,
//! then sleeps for the cycle delay.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acquisition::{acquire_race, provider_for, OddsProvider, RaceCard, SharedProvider};
use crate::alerting::{AlertEngine, NotificationManager, Notifier};
use crate::clock::SharedClock;
use crate::config::{Config, SchedulerConfig};
use crate::db::{persist_observation_set, SharedStore};
use crate::error::{Error, Result};
use crate::models::TrackedSource;

/// Where a source is in its polling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Not polled since startup
    NeverPolled,
    /// Interval elapsed, poll pending in this cycle
    Due,
    /// Poll in progress
    Polling,
    /// Waiting for the interval to elapse
    Idle,
    /// Scheduler stopped
    Stopped,
}

/// Scheduler bookkeeping for one source
#[derive(Clone)]
pub struct SourceState {
    /// The source
    pub source: TrackedSource,
    /// Current state
    pub state: PollState,
    /// Start of the last successful poll
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Failed polls since the last success
    pub consecutive_failures: u32,
    /// Start of the last failed poll
    pub last_failure_at: Option<DateTime<Utc>>,
    provider: SharedProvider,
}

impl SourceState {
    fn new(source: TrackedSource, provider: SharedProvider) -> Self {
        Self {
            source,
            state: PollState::NeverPolled,
            last_polled_at: None,
            consecutive_failures: 0,
            last_failure_at: None,
            provider,
        }
    }
}

/// Outcome of polling one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Races on the card
    pub races: usize,
    /// Observations stored
    pub observations: usize,
    /// Alerts stored
    pub alerts: usize,
    /// Alerts delivered while polling
    pub delivered: usize,
    /// Races skipped after an acquisition error
    pub failed_races: usize,
}

/// Outcome of one scheduler cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Sources polled successfully, with their reports
    pub polled: Vec<(String, PollReport)>,
    /// Sources whose poll failed
    pub failed: Vec<String>,
    /// Alerts delivered by the end-of-cycle flushes
    pub flushed: usize,
}

/// Whether a source last polled at `last` is due at `now`
pub fn is_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        None => true,
        Some(last) => (now - last)
            .to_std()
            .map_or(false, |elapsed| elapsed >= interval),
    }
}

/// Everything a poll needs, kept apart from the per-source states
struct Poller {
    store: SharedStore,
    engine: AlertEngine,
    notifications: Arc<NotificationManager>,
    clock: SharedClock,
    acquisition_timeout: Duration,
}

impl Poller {
    async fn poll_source(&self, source: &TrackedSource, provider: &dyn OddsProvider) -> Result<PollReport> {
        let today = self.clock.now().date_naive();
        let races = self
            .with_timeout("races", provider.races(today))
            .await?;

        let mut report = PollReport {
            races: races.len(),
            ..PollReport::default()
        };

        for race in &races {
            match self.poll_race(source, provider, race).await {
                Ok(race_report) => {
                    report.observations += race_report.observations;
                    report.alerts += race_report.alerts;
                    report.delivered += race_report.delivered;
                }
                // storage errors fail the whole poll
                Err(e @ (Error::Database(_) | Error::Migration(_))) => return Err(e),
                Err(e) => {
                    report.failed_races += 1;
                    error!(source = %source.name, race = %race.id, error = %e, "Error processing race; skipped");
                }
            }
        }

        if !races.is_empty() && report.failed_races == races.len() {
            return Err(Error::acquisition(
                &source.name,
                format!("all {} races failed", races.len()),
            ));
        }
        if report.failed_races > 0 {
            warn!(
                source = %source.name,
                failed = report.failed_races,
                races = races.len(),
                "Some races could not be polled"
            );
        }
        Ok(report)
    }

    async fn poll_race(
        &self,
        source: &TrackedSource,
        provider: &dyn OddsProvider,
        race: &RaceCard,
    ) -> Result<PollReport> {
        let observed_at = self.clock.now();
        let mut set = self
            .with_timeout("race markets", acquire_race(provider, source, race, observed_at))
            .await?;

        if set.is_empty() {
            debug!(source = %source.name, race = %race.id, "No markets published");
            return Ok(PollReport::default());
        }

        persist_observation_set(self.store.as_ref(), &mut set).await?;

        let alerts = self.engine.evaluate_batch(&set).await;
        let mut delivered = 0;
        for alert in &alerts {
            if self.notifications.notify(alert).await {
                delivered += 1;
            }
        }

        info!(
            source = %source.name,
            race = %race.id,
            observations = set.entries.len(),
            alerts = alerts.len(),
            "Polled race"
        );

        Ok(PollReport {
            races: 1,
            observations: set.entries.len(),
            alerts: alerts.len(),
            delivered,
            failed_races: 0,
        })
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        future: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.acquisition_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(operation, self.acquisition_timeout.as_secs())),
        }
    }
}

/// The top-level polling loop
pub struct Scheduler {
    config: SchedulerConfig,
    poller: Arc<Poller>,
    states: Vec<SourceState>,
}

impl Scheduler {
    /// Create a scheduler with no sources
    pub fn new(
        config: SchedulerConfig,
        store: SharedStore,
        clock: SharedClock,
        engine: AlertEngine,
        notifications: Arc<NotificationManager>,
    ) -> Self {
        Self {
            poller: Arc::new(Poller {
                store,
                engine,
                notifications,
                clock,
                acquisition_timeout: config.acquisition_timeout(),
            }),
            config,
            states: Vec::new(),
        }
    }

    /// Wire the whole pipeline from configuration
    pub fn from_config(config: &Config, store: SharedStore, clock: SharedClock) -> Result<Self> {
        let engine = AlertEngine::new(&config.alerting, store.clone(), clock.clone());
        let notifier = Arc::new(Notifier::from_config(&config.notifier)?);
        let notifications = Arc::new(NotificationManager::new(
            store.clone(),
            notifier,
            clock.clone(),
            config.notifications.batch_window(),
        ));

        let mut scheduler = Self::new(config.scheduler.clone(), store, clock, engine, notifications);
        for source in config.tracked_sources() {
            if !source.enabled {
                debug!(source = %source.name, "Source disabled");
                continue;
            }
            match provider_for(&source, &config.feeds) {
                Ok(provider) => scheduler.add_source(source, provider),
                Err(e) => error!(source = %source.name, error = %e, "Failed to initialize source"),
            }
        }

        Ok(scheduler)
    }

    /// Track `source` through `provider`
    pub fn add_source(&mut self, source: TrackedSource, provider: SharedProvider) {
        info!(source = %source.name, endpoint = %source.endpoint, "Tracking source");
        self.states.push(SourceState::new(source, provider));
    }

    /// Per-source states
    pub fn states(&self) -> &[SourceState] {
        &self.states
    }

    /// Run cycles until `shutdown` is cancelled
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            sources = self.states.len(),
            cycle_delay = ?self.config.cycle_delay(),
            "Scheduler started"
        );

        while !shutdown.is_cancelled() {
            let report = self.tick().await;
            if !report.polled.is_empty() || !report.failed.is_empty() {
                debug!(
                    polled = report.polled.len(),
                    failed = report.failed.len(),
                    flushed = report.flushed,
                    "Cycle complete"
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_delay()) => {}
            }
        }

        for state in &mut self.states {
            state.state = PollState::Stopped;
        }
        info!("Scheduler stopped");
    }

    /// One cycle: poll due sources, then flush batched and unsent alerts
    pub async fn tick(&mut self) -> CycleReport {
        let now = self.poller.clock.now();
        let due: Vec<usize> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.source.enabled && self.is_source_due(state, now))
            .map(|(i, _)| i)
            .collect();

        let mut report = self.poll(due, now).await;

        report.flushed += self.poller.notifications.flush_if_due().await;
        report.flushed += self
            .poller
            .notifications
            .flush_unsent(self.config.unsent_flush_limit)
            .await;

        report
    }

    /// Poll every enabled source once, ignoring intervals
    pub async fn run_once(&mut self) -> CycleReport {
        let now = self.poller.clock.now();
        let all: Vec<usize> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.source.enabled)
            .map(|(i, _)| i)
            .collect();

        self.poll(all, now).await
    }

    fn is_source_due(&self, state: &SourceState, now: DateTime<Utc>) -> bool {
        let interval = state.source.interval(self.config.default_interval_secs);

        if state.consecutive_failures > 0 && self.config.error_backoff_secs > 0 {
            if let Some(failed_at) = state.last_failure_at {
                let backoff = Duration::from_secs(self.config.error_backoff_secs)
                    .saturating_mul(2u32.saturating_pow(state.consecutive_failures - 1))
                    .min(interval);
                if !is_due(Some(failed_at), now, backoff) {
                    return false;
                }
            }
        }

        is_due(state.last_polled_at, now, interval)
    }

    async fn poll(&mut self, indices: Vec<usize>, now: DateTime<Utc>) -> CycleReport {
        let mut jobs = Vec::with_capacity(indices.len());
        for &i in &indices {
            let state = &mut self.states[i];
            state.state = PollState::Due;
            jobs.push((i, state.source.clone(), state.provider.clone()));
            state.state = PollState::Polling;
        }

        let concurrency = self.config.max_concurrent_polls.max(1);
        let poller = Arc::clone(&self.poller);
        let results: Vec<(usize, Result<PollReport>)> = stream::iter(jobs)
            .map(move |(i, source, provider)| {
                let poller = Arc::clone(&poller);
                async move {
                    info!(source = %source.name, "Polling source");
                    (i, poller.poll_source(&source, provider.as_ref()).await)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        let states = &mut self.states;

        let mut report = CycleReport::default();
        for (i, result) in results {
            let state = &mut states[i];
            state.state = PollState::Idle;
            match result {
                Ok(poll) => {
                    state.last_polled_at = Some(now);
                    state.consecutive_failures = 0;
                    state.last_failure_at = None;
                    report.polled.push((state.source.name.clone(), poll));
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    state.last_failure_at = Some(now);
                    warn!(
                        source = %state.source.name,
                        failures = state.consecutive_failures,
                        error = %e,
                        "Poll failed; will retry"
                    );
                    report.failed.push(state.source.name.clone());
                }
            }
        }

        report
    }
}
