//! SQLite storage

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use super::ObservationStore;
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::{Alert, NewAlert, Observation, PayoutTable, RuleKind, SubjectKey};

/// SQLite-backed [`ObservationStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database described by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = database_path(&config.url).and_then(|p| p.parent().map(PathBuf::from)) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(&parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(url = %config.url, "Connected to database");
        Ok(Self { pool })
    }

    /// A private in-memory database, already migrated
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn nth_latest_observation(&self, key: &SubjectKey, offset: i64) -> Result<Option<Observation>> {
        let row = sqlx::query_as::<_, ObservationRow>(
            r#"
            SELECT * FROM observation
            WHERE source = ?1 AND race = ?2 AND subject = ?3
            ORDER BY observed_at_ms DESC, id DESC
            LIMIT 1 OFFSET ?4
            "#,
        )
        .bind(&key.source)
        .bind(&key.race)
        .bind(&key.subject)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl ObservationStore for SqliteStore {
    async fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO observation (
                source, race, subject, label, value, pool_amount, total_pool, observed_at_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&observation.key.source)
        .bind(&observation.key.race)
        .bind(&observation.key.subject)
        .bind(&observation.label)
        .bind(observation.value)
        .bind(observation.pool_amount)
        .bind(observation.total_pool)
        .bind(observation.observed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn latest_observation(&self, key: &SubjectKey) -> Result<Option<Observation>> {
        self.nth_latest_observation(key, 0).await
    }

    async fn previous_observation(&self, key: &SubjectKey) -> Result<Option<Observation>> {
        self.nth_latest_observation(key, 1).await
    }

    async fn insert_payouts(
        &self,
        source: &str,
        race: &str,
        observed_at: DateTime<Utc>,
        table: &PayoutTable,
    ) -> Result<usize> {
        if table.payouts.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for (combination, payout) in &table.payouts {
            sqlx::query(
                r#"
                INSERT INTO payout_snapshot (
                    source, race, combination, payout, total_pool, observed_at_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(source)
            .bind(race)
            .bind(combination)
            .bind(payout)
            .bind(table.total_pool)
            .bind(observed_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(table.payouts.len())
    }

    async fn insert_alert(&self, alert: &NewAlert) -> Result<Alert> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert (
                triggered_at_ms, source, race, subject, rule,
                threshold_value, actual_value, message, sent
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
            "#,
        )
        .bind(alert.triggered_at.timestamp_millis())
        .bind(&alert.key.source)
        .bind(&alert.key.race)
        .bind(&alert.key.subject)
        .bind(alert.rule.as_str())
        .bind(alert.threshold_value)
        .bind(alert.actual_value)
        .bind(&alert.message)
        .execute(&self.pool)
        .await?;

        Ok(Alert::from_new(result.last_insert_rowid(), alert.clone()))
    }

    async fn count_recent_alerts(
        &self,
        rule: RuleKind,
        key: &SubjectKey,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM alert
            WHERE rule = ?1
              AND source = ?2
              AND race = ?3
              AND subject = ?4
              AND triggered_at_ms > ?5
            "#,
        )
        .bind(rule.as_str())
        .bind(&key.source)
        .bind(&key.race)
        .bind(&key.subject)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn mark_alert_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE alert SET sent = 1, sent_at_ms = ?2 WHERE id = ?1 AND sent = 0")
            .bind(id)
            .bind(sent_at.timestamp_millis())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(alert_id = id, "Alert already marked sent or missing");
        }

        Ok(())
    }

    async fn unsent_alerts(&self, limit: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT * FROM alert
            WHERE sent = 0
            ORDER BY triggered_at_ms ASC, id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let alerts = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match Alert::try_from(row) {
                    Ok(alert) => Some(alert),
                    Err(e) => {
                        warn!(alert_id = id, error = %e, "Skipping unreadable alert row");
                        None
                    }
                }
            })
            .collect();

        Ok(alerts)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Filesystem path of a SQLite URL, `None` for in-memory databases
pub fn database_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();

    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// Database row types for mapping

#[derive(sqlx::FromRow)]
struct ObservationRow {
    id: i64,
    source: String,
    race: String,
    subject: String,
    label: String,
    value: Option<f64>,
    pool_amount: Option<i64>,
    total_pool: Option<i64>,
    observed_at_ms: i64,
}

impl From<ObservationRow> for Observation {
    fn from(row: ObservationRow) -> Self {
        Observation {
            id: Some(row.id),
            key: SubjectKey::new(row.source, row.race, row.subject),
            label: row.label,
            value: row.value,
            pool_amount: row.pool_amount,
            total_pool: row.total_pool,
            observed_at: from_millis(row.observed_at_ms),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    triggered_at_ms: i64,
    source: String,
    race: String,
    subject: String,
    rule: String,
    threshold_value: f64,
    actual_value: f64,
    message: String,
    sent: bool,
    sent_at_ms: Option<i64>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Alert {
            id: row.id,
            triggered_at: from_millis(row.triggered_at_ms),
            key: SubjectKey::new(row.source, row.race, row.subject),
            rule: row.rule.parse()?,
            threshold_value: row.threshold_value,
            actual_value: row.actual_value,
            message: row.message,
            sent: row.sent,
            sent_at: row.sent_at_ms.map(from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn observation(key: &SubjectKey, value: f64, observed_at: DateTime<Utc>) -> Observation {
        Observation {
            id: None,
            key: key.clone(),
            label: "Thunder Bolt".to_string(),
            value: Some(value),
            pool_amount: Some(25_000),
            total_pool: Some(98_000),
            observed_at,
        }
    }

    fn new_alert(key: &SubjectKey, rule: RuleKind, triggered_at: DateTime<Utc>) -> NewAlert {
        NewAlert {
            triggered_at,
            key: key.clone(),
            rule,
            threshold_value: 2.0,
            actual_value: 1.2,
            message: "Thunder Bolt (1) odds dropped to 1.2 at Test Track".to_string(),
        }
    }

    #[tokio::test]
    async fn test_latest_and_previous_observation() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = SubjectKey::new("Test Track", "2026-10-16/R1", "1");

        assert!(store.latest_observation(&key).await.unwrap().is_none());
        assert!(store.previous_observation(&key).await.unwrap().is_none());

        store.insert_observation(&observation(&key, 3.0, at(0))).await.unwrap();
        assert!(store.previous_observation(&key).await.unwrap().is_none());

        let second = store.insert_observation(&observation(&key, 4.5, at(60))).await.unwrap();

        let latest = store.latest_observation(&key).await.unwrap().unwrap();
        assert_eq!(latest.id, Some(second));
        assert_eq!(latest.value, Some(4.5));
        assert_eq!(latest.observed_at, at(60));

        let previous = store.previous_observation(&key).await.unwrap().unwrap();
        assert_eq!(previous.value, Some(3.0));
        assert_eq!(previous.pool_amount, Some(25_000));
    }

    #[tokio::test]
    async fn test_observations_are_scoped_to_subject() {
        let store = SqliteStore::in_memory().await.unwrap();
        let one = SubjectKey::new("Test Track", "R1", "1");
        let two = SubjectKey::new("Test Track", "R1", "2");

        store.insert_observation(&observation(&one, 3.0, at(0))).await.unwrap();
        store.insert_observation(&observation(&two, 8.0, at(10))).await.unwrap();

        let latest = store.latest_observation(&one).await.unwrap().unwrap();
        assert_eq!(latest.value, Some(3.0));
        assert!(store.previous_observation(&one).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_payouts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut table = PayoutTable {
            total_pool: Some(50_000),
            ..Default::default()
        };
        table.payouts.insert("1-2".to_string(), 31.5);
        table.payouts.insert("2-1".to_string(), 36.0);

        let written = store.insert_payouts("Test Track", "R1", at(0), &table).await.unwrap();
        assert_eq!(written, 2);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payout_snapshot")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_alert_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = SubjectKey::new("Test Track", "R1", "1");

        let first = store.insert_alert(&new_alert(&key, RuleKind::WinOddsLow, at(0))).await.unwrap();
        let second = store.insert_alert(&new_alert(&key, RuleKind::OddsChange, at(30))).await.unwrap();
        assert!(second.id > first.id);
        assert!(!first.sent);

        let unsent = store.unsent_alerts(10).await.unwrap();
        assert_eq!(unsent.len(), 2);
        assert_eq!(unsent[0].id, first.id);
        assert_eq!(unsent[0].rule, RuleKind::WinOddsLow);
        assert_eq!(unsent[0].triggered_at, at(0));

        store.mark_alert_sent(first.id, at(45)).await.unwrap();

        let unsent = store.unsent_alerts(10).await.unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, second.id);

        let limited = store.unsent_alerts(0).await.unwrap();
        assert!(limited.is_empty());
    }

    #[tokio::test]
    async fn test_count_recent_alerts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = SubjectKey::new("Test Track", "R1", "1");
        let other = SubjectKey::new("Test Track", "R1", "2");

        store.insert_alert(&new_alert(&key, RuleKind::WinOddsLow, at(100))).await.unwrap();

        let count = |rule, key: SubjectKey, since| {
            let store = store.clone();
            async move { store.count_recent_alerts(rule, &key, since).await.unwrap() }
        };

        assert_eq!(count(RuleKind::WinOddsLow, key.clone(), at(0)).await, 1);
        assert_eq!(count(RuleKind::WinOddsLow, key.clone(), at(100)).await, 0);
        assert_eq!(count(RuleKind::WinOddsHigh, key.clone(), at(0)).await, 0);
        assert_eq!(count(RuleKind::WinOddsLow, other, at(0)).await, 0);
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("odds.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            max_connections: 2,
            busy_timeout_secs: 5,
        };

        let store = SqliteStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite://data/odds.db"), Some(PathBuf::from("data/odds.db")));
        assert_eq!(database_path("sqlite:odds.db?mode=rwc"), Some(PathBuf::from("odds.db")));
        assert_eq!(database_path("sqlite::memory:"), None);
        assert_eq!(database_path("postgres://localhost/db"), None);
    }
}
