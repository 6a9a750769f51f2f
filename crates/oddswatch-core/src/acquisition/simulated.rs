//! Simulated odds for test tracks

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::parsers::parse_odds;
use super::{ExactaProbables, OddsProvider, RaceCard, WinEntry, WinOdds};
use crate::error::Result;

const RACES_PER_CARD: u32 = 8;
const EXACTA_RUNNERS: usize = 4;
const EXACTA_POOL: i64 = 50_000;

/// Program number, name, morning line and win pool of the simulated field
const FIELD: [(&str, &str, &str, i64); 8] = [
    ("1", "Thunder Bolt", "5-2", 25_000),
    ("2", "Lightning Strike", "3-1", 22_000),
    ("3", "Storm Chaser", "7-2", 18_000),
    ("4", "Wind Runner", "10-1", 8_000),
    ("5", "Rain Dancer", "15-1", 5_000),
    ("6", "Cloud Walker", "20-1", 3_000),
    ("7", "Sun Blazer", "8-1", 10_000),
    ("8", "Moon Shadow", "12-1", 7_000),
];

/// Generates a plausible card that drifts randomly between polls
pub struct SimulatedProvider {
    rng: Mutex<StdRng>,
}

impl SimulatedProvider {
    /// Provider seeded from the OS
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible provider
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OddsProvider for SimulatedProvider {
    async fn races(&self, date: NaiveDate) -> Result<Vec<RaceCard>> {
        Ok((1..=RACES_PER_CARD)
            .map(|number| RaceCard {
                post_time: Some(format!("{:02}:00", 12 + number)),
                ..RaceCard::new(date, number)
            })
            .collect())
    }

    async fn win_odds(&self, _race: &RaceCard) -> Result<Option<WinOdds>> {
        let mut rng = self.rng.lock();

        let entries = FIELD
            .iter()
            .map(|(program, name, morning_line, pool)| WinEntry {
                program_number: (*program).to_string(),
                name: (*name).to_string(),
                odds: parse_odds(morning_line).map(|odds| odds * rng.gen_range(0.8..=1.2)),
                pool_amount: Some((*pool as f64 * rng.gen_range(0.9..=1.1)) as i64),
            })
            .collect();

        Ok(Some(WinOdds {
            total_pool: Some(FIELD.iter().map(|(_, _, _, pool)| pool).sum()),
            entries,
        }))
    }

    async fn exacta_probables(&self, _race: &RaceCard) -> Result<Option<ExactaProbables>> {
        let mut rng = self.rng.lock();
        let mut probables = BTreeMap::new();

        for first in 1..=EXACTA_RUNNERS {
            for second in 1..=EXACTA_RUNNERS {
                if first == second {
                    continue;
                }
                let base = ((first + second) * 10) as f64;
                let payout = base * rng.gen_range(0.8..=1.5);
                probables.insert(format!("{first}-{second}"), (payout * 100.0).round() / 100.0);
            }
        }

        Ok(Some(ExactaProbables {
            total_pool: Some(EXACTA_POOL),
            probables,
        }))
    }
}
