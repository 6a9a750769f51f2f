//! # Oddswatch
//!
//! Odds polling, threshold alerting and notification delivery.
//!
//! Oddswatch polls tracked racing sources on a schedule, stores every odds
//! observation, evaluates threshold and rate-of-change rules against it,
//! suppresses repeats and delivers what remains through a webhook notifier.
//!
//! ## Architecture
//!
//! - **Acquisition**: Odds providers (HTTP JSON feeds or a simulated card)
//! - **Storage**: SQLite for observations, payout snapshots and alerts
//! - **Alerting**: Evaluators, suppression, templating and batched delivery
//! - **Scheduler**: Per-source intervals with error backoff
//!
//! ## Quick Start
//!
//! ```bash
//! # Poll every source once
//! oddswatch once
//!
//! # Run the scheduler until interrupted
//! oddswatch run
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod acquisition;
pub mod alerting;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod scheduler;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::acquisition::{OddsProvider, SharedProvider};
    pub use crate::alerting::{AlertEngine, NotificationManager, Notifier};
    pub use crate::clock::{Clock, SharedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::db::{ObservationStore, SharedStore, SqliteStore};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::scheduler::Scheduler;
}
