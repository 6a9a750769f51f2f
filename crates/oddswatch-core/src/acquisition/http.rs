//! JSON odds feed over HTTP

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::parsers::{parse_odds, parse_payout, parse_pool_amount, parse_program_number};
use super::{ExactaProbables, OddsProvider, RaceCard, WinEntry, WinOdds};
use crate::config::FeedConfig;
use crate::error::{Error, Result};

/// Provider for sources that publish a JSON odds feed:
///
/// - `GET {endpoint}/races?date=YYYY-MM-DD`
/// - `GET {endpoint}/races/{race}/win`
/// - `GET {endpoint}/races/{race}/exacta`
///
/// A 404 on a market means the market is not published.
pub struct JsonFeedProvider {
    source_name: String,
    base: Url,
    client: Client,
    min_interval: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl JsonFeedProvider {
    /// Create a provider rooted at `base`
    pub fn new(source_name: &str, base: Url, config: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            source_name: source_name.to_string(),
            base,
            client,
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            last_request: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| Error::acquisition(&self.source_name, format!("bad feed url: {e}")))
    }

    /// Wait until the minimum request spacing has passed
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET `url` as JSON, `None` on 404
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let mut attempt = 1;
        loop {
            self.pace().await;

            let outcome = match self.client.get(url.clone()).send().await {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_success() => {
                    return Ok(Some(response.json::<T>().await?));
                }
                Ok(response) => format!("status {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(Error::acquisition(
                    &self.source_name,
                    format!("GET {url} failed after {attempt} attempts: {outcome}"),
                ));
            }

            let delay = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
            warn!(
                source = %self.source_name,
                %url,
                attempt,
                max_attempts = self.max_attempts,
                error = %outcome,
                "Feed request failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl OddsProvider for JsonFeedProvider {
    async fn races(&self, date: NaiveDate) -> Result<Vec<RaceCard>> {
        let mut url = self.url("races")?;
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string());

        let races: Vec<FeedRace> = self.get_json(url).await?.unwrap_or_default();
        debug!(source = %self.source_name, races = races.len(), "Fetched race card");

        Ok(races
            .into_iter()
            .map(|race| RaceCard {
                id: race.id.unwrap_or_else(|| RaceCard::new(date, race.number).id),
                number: race.number,
                date,
                post_time: race.post_time,
            })
            .collect())
    }

    async fn win_odds(&self, race: &RaceCard) -> Result<Option<WinOdds>> {
        let url = self.url(&format!("races/{}/win", race.id))?;
        let Some(feed) = self.get_json::<FeedWinOdds>(url).await? else {
            return Ok(None);
        };

        let entries = feed
            .horses
            .into_iter()
            .map(|horse| WinEntry {
                program_number: parse_program_number(&horse.program_number),
                name: horse.name,
                odds: horse.odds.as_ref().and_then(odds_value),
                pool_amount: horse.pool_amount.as_ref().and_then(pool_value),
            })
            .collect();

        Ok(Some(WinOdds {
            total_pool: feed.total_pool.as_ref().and_then(pool_value),
            entries,
        }))
    }

    async fn exacta_probables(&self, race: &RaceCard) -> Result<Option<ExactaProbables>> {
        let url = self.url(&format!("races/{}/exacta", race.id))?;
        let Some(feed) = self.get_json::<FeedExacta>(url).await? else {
            return Ok(None);
        };

        let probables = feed
            .probables
            .into_iter()
            .filter_map(|(combo, payout)| payout_value(&payout).map(|p| (combo, p)))
            .collect();

        Ok(Some(ExactaProbables {
            total_pool: feed.total_pool.as_ref().and_then(pool_value),
            probables,
        }))
    }
}

// Feeds publish amounts either as numbers or as display strings

fn odds_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_odds(s),
        _ => None,
    }
}

fn pool_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => parse_pool_amount(s),
        _ => None,
    }
}

fn payout_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_payout(s),
        _ => None,
    }
}

#[derive(Deserialize)]
struct FeedRace {
    id: Option<String>,
    #[serde(alias = "race_number")]
    number: u32,
    post_time: Option<String>,
}

#[derive(Deserialize)]
struct FeedHorse {
    program_number: String,
    name: String,
    odds: Option<Value>,
    pool_amount: Option<Value>,
}

#[derive(Deserialize)]
struct FeedWinOdds {
    total_pool: Option<Value>,
    #[serde(alias = "entries")]
    horses: Vec<FeedHorse>,
}

#[derive(Deserialize)]
struct FeedExacta {
    total_pool: Option<Value>,
    probables: BTreeMap<String, Value>,
}
