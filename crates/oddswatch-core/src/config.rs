//! Configuration management for Oddswatch
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `ODDSWATCH__SECTION__KEY` environment variables (a `.env` file is read first).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::models::TrackedSource;

/// Default location searched when no config file is given
pub const DEFAULT_CONFIG_PATH: &str = "config/oddswatch";

/// Longest suppression or batch window honoured; larger values are clamped
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

fn window(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_WINDOW_SECS)).unwrap_or(0);
    chrono::Duration::try_seconds(secs).unwrap_or_else(chrono::Duration::zero)
}

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Tracked sources
    pub sources: Vec<SourceConfig>,

    /// Alerting configuration
    pub alerting: AlertingConfig,

    /// Notification batching configuration
    pub notifications: NotificationsConfig,

    /// Notifier transport configuration
    pub notifier: NotifierConfig,

    /// HTTP odds feed configuration
    pub feeds: FeedConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// An explicit `path` must exist; without one, `config/oddswatch.{toml,yaml,json}`
    /// is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("ODDSWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        debug!(sources = config.sources.len(), "Configuration loaded");
        Ok(config)
    }

    /// Tracked sources built from the `sources` section
    pub fn tracked_sources(&self) -> Vec<TrackedSource> {
        self.sources.iter().map(TrackedSource::from).collect()
    }

    /// Check the configuration for problems that should be reported but not abort startup
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.alerting.enabled {
            if self.alerting.win_odds.min >= self.alerting.win_odds.max {
                warnings.push(format!(
                    "alerting.win_odds.min ({}) must be less than max ({}); win odds range alerts disabled",
                    self.alerting.win_odds.min, self.alerting.win_odds.max
                ));
            }
            if self.alerting.exacta.min >= self.alerting.exacta.max {
                warnings.push(format!(
                    "alerting.exacta.min ({}) must be less than max ({}); exacta payout alerts disabled",
                    self.alerting.exacta.min, self.alerting.exacta.max
                ));
            }
            if self.alerting.rate_of_change_percent <= 0.0 {
                warnings.push(format!(
                    "alerting.rate_of_change_percent ({}) must be positive; odds change alerts disabled",
                    self.alerting.rate_of_change_percent
                ));
            }
        }

        if self.alerting.suppression_window_secs > MAX_WINDOW_SECS {
            warnings.push(format!(
                "alerting.suppression_window_secs ({}) exceeds {}; clamped",
                self.alerting.suppression_window_secs, MAX_WINDOW_SECS
            ));
        }
        if self.notifications.batch_window_secs > MAX_WINDOW_SECS {
            warnings.push(format!(
                "notifications.batch_window_secs ({}) exceeds {}; clamped",
                self.notifications.batch_window_secs, MAX_WINDOW_SECS
            ));
        }

        if self.sources.is_empty() {
            warnings.push("no sources configured".to_string());
        } else if !self.sources.iter().any(|s| s.enabled) {
            warnings.push("all configured sources are disabled".to_string());
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                warnings.push(format!("duplicate source name '{}'", source.name));
            }
            if let Err(e) = url::Url::parse(&source.endpoint) {
                warnings.push(format!(
                    "source '{}' has an invalid endpoint '{}': {}",
                    source.name, source.endpoint, e
                ));
            }
            if source.interval_secs == Some(0) {
                warnings.push(format!("source '{}' has a zero polling interval", source.name));
            }
        }

        if let Some(webhook) = &self.notifier.webhook_url {
            if let Err(e) = url::Url::parse(webhook) {
                warnings.push(format!("notifier.webhook_url is invalid: {e}"));
            }
        }
        if self.notifier.max_attempts == 0 {
            warnings.push("notifier.max_attempts is 0; one attempt will be made".to_string());
        }

        warnings
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum connections
    pub max_connections: u32,
    /// Seconds to wait on a locked database before failing
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/oddswatch.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Polling interval for sources without an override
    pub default_interval_secs: u64,
    /// Delay between scheduler cycles
    pub cycle_delay_secs: u64,
    /// Deadline for a single acquisition call
    pub acquisition_timeout_secs: u64,
    /// Number of sources polled concurrently within a cycle
    pub max_concurrent_polls: usize,
    /// Base delay before retrying a failed source (0 retries on the next cycle)
    pub error_backoff_secs: u64,
    /// Unsent alerts re-attempted at the end of each cycle
    pub unsent_flush_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 300,
            cycle_delay_secs: 10,
            acquisition_timeout_secs: 30,
            max_concurrent_polls: 1,
            error_backoff_secs: 0,
            unsent_flush_limit: 10,
        }
    }
}

impl SchedulerConfig {
    /// Inter-cycle pacing delay
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    /// Acquisition deadline
    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_secs(self.acquisition_timeout_secs)
    }
}

/// A tracked source as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source name
    pub name: String,
    /// Short code used in logs and messages
    #[serde(default)]
    pub code: Option<String>,
    /// Polling endpoint (`simulated://...` or `http(s)://...`)
    pub endpoint: String,
    /// Whether the source is polled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Polling interval override
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Whether win odds are fetched
    #[serde(default = "default_true")]
    pub fetch_win: bool,
    /// Whether exacta probables are fetched
    #[serde(default)]
    pub fetch_exacta: bool,
}

fn default_true() -> bool {
    true
}

/// Min/max pair for range rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Lower bound (values strictly below trigger)
    pub min: f64,
    /// Upper bound (values strictly above trigger)
    pub max: f64,
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Global alerting switch
    pub enabled: bool,
    /// Win odds range
    pub win_odds: RangeConfig,
    /// Minimum odds movement between polls, in percent
    pub rate_of_change_percent: f64,
    /// Exacta payout range
    pub exacta: RangeConfig,
    /// Window in which identical alerts are suppressed
    pub suppression_window_secs: u64,
    /// Cap on alerts accepted from a single observation set
    pub max_alerts_per_race: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            win_odds: RangeConfig { min: 1.5, max: 20.0 },
            rate_of_change_percent: 25.0,
            exacta: RangeConfig {
                min: 10.0,
                max: 1000.0,
            },
            suppression_window_secs: 300,
            max_alerts_per_race: 10,
        }
    }
}

impl AlertingConfig {
    /// Suppression window as a chrono duration
    pub fn suppression_window(&self) -> chrono::Duration {
        window(self.suppression_window_secs)
    }
}

/// Notification batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Seconds pending alerts accumulate before a batch flush
    pub batch_window_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            batch_window_secs: 60,
        }
    }
}

impl NotificationsConfig {
    /// Batch window as a chrono duration
    pub fn batch_window(&self) -> chrono::Duration {
        window(self.batch_window_secs)
    }
}

/// Payload shape posted to the webhook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    /// `{"subject": ..., "body": ...}`
    #[default]
    Generic,
    /// Slack incoming webhook attachment
    Slack,
}

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook URL; notifications are log-only when absent
    pub webhook_url: Option<String>,
    /// Webhook payload format
    pub format: WebhookFormat,
    /// Bearer token sent with each webhook request
    pub auth_token: Option<String>,
    /// Total delivery attempts per message
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub base_backoff_ms: u64,
    /// Minimum spacing between two outbound messages
    pub min_send_interval_ms: u64,
    /// HTTP timeout per attempt
    pub timeout_secs: u64,
    /// Prefix for message subjects
    pub subject_prefix: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            format: WebhookFormat::Generic,
            auth_token: None,
            max_attempts: 3,
            base_backoff_ms: 1000,
            min_send_interval_ms: 1000,
            timeout_secs: 10,
            subject_prefix: "[Odds Alert]".to_string(),
        }
    }
}

/// HTTP odds feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Minimum spacing between two requests to the same feed
    pub min_request_interval_ms: u64,
    /// Attempts per request
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub retry_backoff_ms: u64,
    /// HTTP timeout per request
    pub timeout_secs: u64,
    /// User agent sent to feeds
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 2000,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            timeout_secs: 10,
            user_agent: concat!("oddswatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Directory for daily rolling log files; console only when absent
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}
