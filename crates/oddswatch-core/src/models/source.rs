//! Tracked source models

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SourceConfig;

/// A source polled by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSource {
    /// Unique source name
    pub name: String,

    /// Short code, defaults to the name
    pub code: String,

    /// Polling endpoint reference
    pub endpoint: String,

    /// Whether the source is polled
    pub enabled: bool,

    /// Polling interval override in seconds
    pub interval_secs: Option<u64>,

    /// Fetch win odds
    pub fetch_win: bool,

    /// Fetch exacta probables
    pub fetch_exacta: bool,
}

impl TrackedSource {
    /// Create an enabled source fetching win odds only
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: name.clone(),
            name,
            endpoint: endpoint.into(),
            enabled: true,
            interval_secs: None,
            fetch_win: true,
            fetch_exacta: false,
        }
    }

    /// Polling interval, falling back to `default_secs`
    pub fn interval(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.interval_secs.unwrap_or(default_secs))
    }
}

impl From<&SourceConfig> for TrackedSource {
    fn from(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            code: config.code.clone().unwrap_or_else(|| config.name.clone()),
            endpoint: config.endpoint.clone(),
            enabled: config.enabled,
            interval_secs: config.interval_secs,
            fetch_win: config.fetch_win,
            fetch_exacta: config.fetch_exacta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_override() {
        let mut source = TrackedSource::new("A", "simulated://a");
        assert_eq!(source.interval(300), Duration::from_secs(300));

        source.interval_secs = Some(60);
        assert_eq!(source.interval(300), Duration::from_secs(60));
    }
}
