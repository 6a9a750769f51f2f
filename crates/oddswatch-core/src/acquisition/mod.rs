//! Acquisition of race cards and odds from tracked sources
//!
//! Providers return normalized feed structures; [`acquire_race`] turns them into
//! the [`ObservationSet`] the rest of the pipeline consumes.

mod http;
pub mod parsers;
mod simulated;

pub use http::JsonFeedProvider;
pub use simulated::SimulatedProvider;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::models::{Observation, ObservationSet, PayoutTable, SubjectKey, TrackedSource};

/// One race on a source's card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceCard {
    /// Identifier unique within the source
    pub id: String,
    /// Race number on the card
    pub number: u32,
    /// Race date
    pub date: NaiveDate,
    /// Scheduled post time, as published
    pub post_time: Option<String>,
}

impl RaceCard {
    /// Card entry with the conventional `YYYY-MM-DD-R{n}` identifier
    pub fn new(date: NaiveDate, number: u32) -> Self {
        Self {
            id: format!("{}-R{}", date.format("%Y-%m-%d"), number),
            number,
            date,
            post_time: None,
        }
    }
}

/// One runner in the win market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinEntry {
    /// Normalized program number
    pub program_number: String,
    /// Runner name
    pub name: String,
    /// Odds ratio, `None` when scratched or unpriced
    pub odds: Option<f64>,
    /// Amount wagered on the runner
    pub pool_amount: Option<i64>,
}

/// Win market for a race
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinOdds {
    /// Total win pool
    pub total_pool: Option<i64>,
    /// Runners in card order
    pub entries: Vec<WinEntry>,
}

/// Exacta probable payouts for a race
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExactaProbables {
    /// Total exacta pool
    pub total_pool: Option<i64>,
    /// Payout per `first-second` combination
    pub probables: BTreeMap<String, f64>,
}

/// A source of race cards and odds
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Races on the card for `date`, in card order
    async fn races(&self, date: NaiveDate) -> Result<Vec<RaceCard>>;

    /// Current win market, `None` when the source publishes none
    async fn win_odds(&self, race: &RaceCard) -> Result<Option<WinOdds>>;

    /// Current exacta probables, `None` when the source publishes none
    async fn exacta_probables(&self, race: &RaceCard) -> Result<Option<ExactaProbables>>;
}

/// Shared provider handle
pub type SharedProvider = Arc<dyn OddsProvider>;

/// Pick a provider for `source` from its endpoint scheme
pub fn provider_for(source: &TrackedSource, feeds: &FeedConfig) -> Result<SharedProvider> {
    let url = url::Url::parse(&source.endpoint).map_err(|e| {
        Error::config(format!(
            "source '{}' has an invalid endpoint '{}': {}",
            source.name, source.endpoint, e
        ))
    })?;

    match url.scheme() {
        "simulated" => Ok(Arc::new(SimulatedProvider::new())),
        "http" | "https" => Ok(Arc::new(JsonFeedProvider::new(&source.name, url, feeds)?)),
        other => Err(Error::config(format!(
            "source '{}' uses unsupported scheme '{}'",
            source.name, other
        ))),
    }
}

/// Fetch the markets `source` tracks for `race` and normalize them
pub async fn acquire_race(
    provider: &dyn OddsProvider,
    source: &TrackedSource,
    race: &RaceCard,
    observed_at: DateTime<Utc>,
) -> Result<ObservationSet> {
    let mut set = ObservationSet::new(&source.name, &race.id, observed_at);

    if source.fetch_win {
        if let Some(win) = provider.win_odds(race).await? {
            set.entries = win
                .entries
                .into_iter()
                .filter(|entry| !entry.program_number.is_empty())
                .map(|entry| Observation {
                    id: None,
                    key: SubjectKey::new(&source.name, &race.id, entry.program_number),
                    label: entry.name,
                    value: entry.odds,
                    pool_amount: entry.pool_amount,
                    total_pool: win.total_pool,
                    observed_at,
                })
                .collect();
        }
    }

    if source.fetch_exacta {
        if let Some(exacta) = provider.exacta_probables(race).await? {
            set.payouts = Some(PayoutTable {
                total_pool: exacta.total_pool,
                payouts: exacta.probables,
            });
        }
    }

    debug!(
        source = %source.name,
        race = %race.id,
        entries = set.entries.len(),
        payouts = set.payouts.as_ref().map_or(0, |t| t.payouts.len()),
        "Acquired race"
    );

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_race_card_id() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let card = RaceCard::new(date, 3);
        assert_eq!(card.id, "2026-10-16-R3");
        assert_eq!(card.number, 3);
    }

    #[test]
    fn test_provider_for_scheme() {
        let feeds = FeedConfig::default();
        assert!(provider_for(&TrackedSource::new("T", "simulated://test-track"), &feeds).is_ok());
        assert!(provider_for(&TrackedSource::new("B", "https://feeds.example.com/b"), &feeds).is_ok());
        assert!(provider_for(&TrackedSource::new("F", "ftp://example.com"), &feeds).is_err());
        assert!(provider_for(&TrackedSource::new("X", "not a url"), &feeds).is_err());
    }

    #[tokio::test]
    async fn test_acquire_race_respects_market_flags() {
        let provider = SimulatedProvider::with_seed(7);
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let race = RaceCard::new(date, 1);
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

        let mut source = TrackedSource::new("Test Track", "simulated://test-track");
        let set = acquire_race(&provider, &source, &race, now).await.unwrap();
        assert_eq!(set.entries.len(), 8);
        assert!(set.payouts.is_none());
        assert_eq!(set.entries[0].key, SubjectKey::new("Test Track", &race.id, "1"));
        assert_eq!(set.entries[0].label, "Thunder Bolt");
        assert_eq!(set.entries[0].observed_at, now);
        assert_eq!(set.entries[0].total_pool, Some(98_000));

        source.fetch_win = false;
        source.fetch_exacta = true;
        let set = acquire_race(&provider, &source, &race, now).await.unwrap();
        assert!(set.entries.is_empty());
        assert_eq!(set.payouts.unwrap().payouts.len(), 12);
    }
}
