//! Alerting for Oddswatch
//!
//! Evaluation, suppression and delivery of alerts raised from odds observations.

mod engine;
mod evaluator;
mod manager;
mod notifier;
mod suppressor;
mod templates;
mod webhook;

pub use engine::AlertEngine;
pub use evaluator::{Evaluator, EvaluatorCatalog, Target};
pub use manager::NotificationManager;
pub use notifier::{Message, Notifier, SharedTransport, Transport, TransportError};
pub use suppressor::{fingerprint, Suppressor};
pub use templates::Templates;
pub use webhook::WebhookTransport;

#[cfg(test)]
pub(crate) use notifier::tests::{config as test_notifier_config, ScriptedTransport};
