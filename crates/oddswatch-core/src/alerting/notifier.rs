//! Outbound message delivery
//!
//! [`Notifier`] sits in front of a pluggable [`Transport`]: it spaces sends by a
//! minimum interval and retries transient failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::templates::Templates;
use super::webhook::WebhookTransport;
use crate::config::NotifierConfig;
use crate::error::Result;
use crate::models::Alert;

/// One outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Subject line
    pub subject: String,
    /// Plain text body
    pub body: String,
}

/// Why a transport rejected a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Worth retrying (timeouts, throttling, server errors)
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Credentials rejected; retrying cannot help
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Any other rejection
    #[error("delivery rejected: {0}")]
    Permanent(String),
}

/// Delivers a single message
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message`; `Ok` only once the receiver accepted it
    async fn deliver(&self, message: &Message) -> std::result::Result<(), TransportError>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn Transport>;

/// Rate-limited, retrying front end to a [`Transport`]
pub struct Notifier {
    transport: Option<SharedTransport>,
    templates: Templates,
    max_attempts: u32,
    base_backoff: Duration,
    min_interval: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl Notifier {
    /// Create a notifier over `transport`; `None` disables delivery
    pub fn new(transport: Option<SharedTransport>, config: &NotifierConfig) -> Self {
        Self {
            transport,
            templates: Templates::new(config.subject_prefix.clone()),
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            min_interval: Duration::from_millis(config.min_send_interval_ms),
            last_send: Mutex::new(None),
        }
    }

    /// Create a notifier from configuration, posting to the webhook when one is set
    pub fn from_config(config: &NotifierConfig) -> Result<Self> {
        let transport = match &config.webhook_url {
            Some(url) => {
                info!(url = %url, format = ?config.format, "Webhook notifications enabled");
                Some(Arc::new(WebhookTransport::new(config)?) as SharedTransport)
            }
            None => {
                info!("No webhook configured; alerts will only be logged");
                None
            }
        };
        Ok(Self::new(transport, config))
    }

    /// Whether a transport is configured
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Message templates in use
    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    /// Send a free-form message
    pub async fn send(&self, subject: &str, body: &str) -> bool {
        let message = Message {
            subject: subject.to_string(),
            body: body.to_string(),
        };
        self.deliver(&message).await
    }

    /// Send one alert
    pub async fn send_alert(&self, alert: &Alert) -> bool {
        let message = self.templates.single(alert);
        self.deliver(&message).await
    }

    /// Send several alerts as one message
    pub async fn send_batch(&self, alerts: &[Alert]) -> bool {
        if alerts.is_empty() {
            return true;
        }
        let message = self.templates.batch(alerts);
        self.deliver(&message).await
    }

    async fn deliver(&self, message: &Message) -> bool {
        let Some(transport) = &self.transport else {
            warn!(subject = %message.subject, "No transport configured; message dropped");
            return false;
        };

        let mut attempt = 1;
        loop {
            self.pace().await;

            match transport.deliver(message).await {
                Ok(()) => {
                    info!(subject = %message.subject, attempt, "Notification sent");
                    return true;
                }
                Err(TransportError::Transient(reason)) if attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        subject = %message.subject,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %reason,
                        "Notification failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(subject = %message.subject, attempt, error = %e, "Notification failed");
                    return false;
                }
            }
        }
    }

    /// Delay after the `attempt`th failure
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Hold the gate until the minimum interval since the previous send has passed
    async fn pace(&self) {
        let mut last = self.last_send.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if Instant::now() < ready_at {
                debug!("Rate limiting notification");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;

    /// Transport replaying scripted outcomes, then succeeding
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        outcomes: SyncMutex<VecDeque<std::result::Result<(), TransportError>>>,
        pub(crate) delivered: SyncMutex<Vec<(Instant, Message)>>,
        attempts: SyncMutex<usize>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(outcomes: Vec<std::result::Result<(), TransportError>>) -> Self {
            Self {
                outcomes: SyncMutex::new(outcomes.into()),
                ..Default::default()
            }
        }

        /// Fail every delivery transiently until `succeed` is called
        pub(crate) fn failing() -> Self {
            Self::new(vec![Err(TransportError::Transient("down".into())); 1_000])
        }

        pub(crate) fn succeed(&self) {
            self.outcomes.lock().clear();
        }

        pub(crate) fn attempts(&self) -> usize {
            *self.attempts.lock()
        }

        pub(crate) fn messages(&self) -> Vec<Message> {
            self.delivered.lock().iter().map(|(_, m)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, message: &Message) -> std::result::Result<(), TransportError> {
            *self.attempts.lock() += 1;
            let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
            if outcome.is_ok() {
                self.delivered.lock().push((Instant::now(), message.clone()));
            }
            outcome
        }
    }

    pub(crate) fn config() -> NotifierConfig {
        NotifierConfig {
            webhook_url: Some("http://localhost/hook".to_string()),
            ..NotifierConfig::default()
        }
    }

    fn transient() -> std::result::Result<(), TransportError> {
        Err(TransportError::Transient("503".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![transient(), transient()]));
        let notifier = Notifier::new(Some(transport.clone()), &config());

        assert!(notifier.send("subject", "body").await);
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![transient(); 5]));
        let notifier = Notifier::new(Some(transport.clone()), &config());

        let started = Instant::now();
        assert!(!notifier.send("subject", "body").await);
        assert_eq!(transport.attempts(), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Auth(
            "401".into(),
        ))]));
        let notifier = Notifier::new(Some(transport.clone()), &config());

        assert!(!notifier.send("subject", "body").await);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Permanent(
            "400".into(),
        ))]));
        let notifier = Notifier::new(Some(transport.clone()), &config());

        assert!(!notifier.send("subject", "body").await);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_are_spaced_by_min_interval() {
        let transport = Arc::new(ScriptedTransport::default());
        let notifier = Notifier::new(Some(transport.clone()), &config());

        assert!(notifier.send("one", "body").await);
        assert!(notifier.send("two", "body").await);

        let delivered = transport.delivered.lock();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[1].0 - delivered[0].0 >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disabled_notifier_reports_failure() {
        let notifier = Notifier::new(None, &NotifierConfig::default());
        assert!(!notifier.is_enabled());
        assert!(!notifier.send("subject", "body").await);
    }

    #[test]
    fn test_backoff_doubles() {
        let notifier = Notifier::new(None, &config());
        assert_eq!(notifier.backoff(1), Duration::from_secs(1));
        assert_eq!(notifier.backoff(2), Duration::from_secs(2));
        assert_eq!(notifier.backoff(3), Duration::from_secs(4));
    }
}
