//! Notification policy: immediate delivery, falling back to batching
//!
//! Alerts are sent one by one while delivery works. The first failure starts a
//! pending batch; from then on alerts accumulate and go out together once the
//! batch window has elapsed since the last successful flush.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::notifier::Notifier;
use crate::clock::SharedClock;
use crate::db::SharedStore;
use crate::models::Alert;

struct BatchState {
    pending: Vec<Alert>,
    last_flush: DateTime<Utc>,
}

/// Decides how each alert is delivered and records delivery
pub struct NotificationManager {
    store: SharedStore,
    notifier: Arc<Notifier>,
    clock: SharedClock,
    batch_window: Duration,
    state: Mutex<BatchState>,
}

impl NotificationManager {
    /// Create a manager
    pub fn new(
        store: SharedStore,
        notifier: Arc<Notifier>,
        clock: SharedClock,
        batch_window: Duration,
    ) -> Self {
        let now = clock.now();
        Self {
            store,
            notifier,
            clock,
            batch_window,
            state: Mutex::new(BatchState {
                pending: Vec::new(),
                last_flush: now,
            }),
        }
    }

    /// Deliver `alert`, immediately or as part of the pending batch.
    ///
    /// Returns whether the alert was delivered by this call.
    pub async fn notify(&self, alert: &Alert) -> bool {
        if !self.notifier.is_enabled() {
            info!(alert_id = alert.id, rule = %alert.rule, "Alert (notifications disabled): {}", alert.message);
            self.mark_sent(alert).await;
            return true;
        }

        let batch_due = {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                None
            } else {
                if !state.pending.iter().any(|p| p.id == alert.id) {
                    state.pending.push(alert.clone());
                }
                Some(self.clock.now() - state.last_flush >= self.batch_window)
            }
        };

        match batch_due {
            Some(true) => self.flush().await > 0,
            Some(false) => {
                debug!(alert_id = alert.id, "Alert queued for batch");
                false
            }
            None => {
                if self.notifier.send_alert(alert).await {
                    self.mark_sent(alert).await;
                    true
                } else {
                    warn!(alert_id = alert.id, "Delivery failed; alert queued for batch");
                    let mut state = self.state.lock();
                    if !state.pending.iter().any(|p| p.id == alert.id) {
                        state.pending.push(alert.clone());
                    }
                    false
                }
            }
        }
    }

    /// Flush the pending batch if the window has elapsed, returning the number delivered
    pub async fn flush_if_due(&self) -> usize {
        let due = {
            let state = self.state.lock();
            !state.pending.is_empty() && self.clock.now() - state.last_flush >= self.batch_window
        };

        if due {
            self.flush().await
        } else {
            0
        }
    }

    /// Re-attempt delivery of up to `limit` stored unsent alerts, returning the number delivered
    pub async fn flush_unsent(&self, limit: i64) -> usize {
        let unsent = match self.store.unsent_alerts(limit).await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(error = %e, "Failed to load unsent alerts");
                return 0;
            }
        };

        let pending: HashSet<i64> = self.state.lock().pending.iter().map(|a| a.id).collect();

        let mut delivered = 0;
        for alert in unsent.iter().filter(|a| !pending.contains(&a.id)) {
            if self.notify(alert).await {
                delivered += 1;
            }
        }

        if delivered > 0 {
            info!(delivered, "Delivered previously unsent alerts");
        }
        delivered
    }

    /// Number of alerts waiting in the batch
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Send every pending alert as one message
    async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut self.state.lock().pending);
        if batch.is_empty() {
            return 0;
        }

        if self.notifier.send_batch(&batch).await {
            for alert in &batch {
                self.mark_sent(alert).await;
            }
            self.state.lock().last_flush = self.clock.now();
            info!(alerts = batch.len(), "Alert batch delivered");
            batch.len()
        } else {
            warn!(alerts = batch.len(), "Alert batch delivery failed; keeping alerts pending");
            let mut state = self.state.lock();
            let arrived = std::mem::take(&mut state.pending);
            state.pending = batch;
            for alert in arrived {
                if !state.pending.iter().any(|p| p.id == alert.id) {
                    state.pending.push(alert);
                }
            }
            0
        }
    }

    async fn mark_sent(&self, alert: &Alert) {
        let sent_at = alert.delivery_time(self.clock.now());
        if let Err(e) = self.store.mark_alert_sent(alert.id, sent_at).await {
            error!(alert_id = alert.id, error = %e, "Failed to mark alert sent");
        }
    }
}
