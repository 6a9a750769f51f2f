//! Oddswatch CLI
//!
//! Command-line interface for the Oddswatch odds monitor.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use oddswatch::alerting::{NotificationManager, Notifier};
use oddswatch::clock::{SharedClock, SystemClock};
use oddswatch::db::{SharedStore, SqliteStore};
use oddswatch::health::HealthMonitor;
use oddswatch::scheduler::{CycleReport, Scheduler};
use oddswatch::{logging, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Oddswatch - Odds polling and alerting
#[derive(Parser)]
#[command(name = "oddswatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ODDSWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling scheduler until interrupted
    Run,

    /// Poll every enabled source once and exit
    Once,

    /// Show system health status
    Health,

    /// List configured sources
    Sources,

    /// Inspect and deliver stored alerts
    Alerts {
        #[command(subcommand)]
        command: AlertsCommands,
    },

    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
enum AlertsCommands {
    /// List alerts that have not been delivered
    Unsent {
        /// Maximum number of alerts
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Attempt delivery of stored unsent alerts
    Flush {
        /// Maximum number of alerts
        #[arg(long, default_value = "100")]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match logging::init(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run => run_scheduler(config).await,
        Commands::Once => run_once(config).await,
        Commands::Health => run_health(config, cli.format).await,
        Commands::Sources => run_sources(&config, cli.format),
        Commands::Alerts { command } => run_alerts(config, command, cli.format).await,
        Commands::Db { command } => run_db(config, command).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn open_store(config: &Config) -> anyhow::Result<SharedStore> {
    let store = SqliteStore::connect(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.url))?;
    store.migrate().await.context("running migrations")?;
    Ok(Arc::new(store))
}

async fn ensure_healthy(config: &Config, store: SharedStore) -> anyhow::Result<()> {
    let report = HealthMonitor::new(store, config).check().await;
    if !report.healthy() {
        anyhow::bail!("health check failed");
    }
    Ok(())
}

fn summarize(report: &CycleReport) {
    for (source, poll) in &report.polled {
        info!(
            source = %source,
            races = poll.races,
            observations = poll.observations,
            alerts = poll.alerts,
            delivered = poll.delivered,
            failed_races = poll.failed_races,
            "Source polled"
        );
    }
    for source in &report.failed {
        warn!(source = %source, "Source poll failed");
    }
}

async fn run_scheduler(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    ensure_healthy(&config, store.clone()).await?;

    let clock: SharedClock = Arc::new(SystemClock);
    let mut scheduler = Scheduler::from_config(&config, store, clock)?;
    if scheduler.states().is_empty() {
        warn!("No enabled sources configured");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    scheduler.run(shutdown).await;
    Ok(())
}

async fn run_once(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    ensure_healthy(&config, store.clone()).await?;

    let clock: SharedClock = Arc::new(SystemClock);
    let mut scheduler = Scheduler::from_config(&config, store, clock)?;
    let report = scheduler.run_once().await;
    summarize(&report);

    println!(
        "Polled {} sources ({} failed)",
        report.polled.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        anyhow::bail!("failed sources: {}", report.failed.join(", "));
    }
    Ok(())
}

async fn run_health(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let report = HealthMonitor::new(store, &config).check().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            println!("System Health Check");
            println!("-------------------");
            for check in &report.checks {
                let status = if check.healthy { "ok" } else { "FAILED" };
                println!("{:<14} {:<7} {}", check.name, status, check.detail);
            }
        }
    }

    if !report.healthy() {
        anyhow::bail!("health check failed");
    }
    Ok(())
}

fn run_sources(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let sources = config.tracked_sources();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sources)?),
        OutputFormat::Text => {
            if sources.is_empty() {
                println!("No sources configured");
            }
            for source in &sources {
                let interval = source.interval(config.scheduler.default_interval_secs);
                println!(
                    "{:<20} {:<8} every {:<8} {}",
                    source.name,
                    if source.enabled { "enabled" } else { "disabled" },
                    humantime::format_duration(interval).to_string(),
                    source.endpoint
                );
            }
        }
    }
    Ok(())
}

async fn run_alerts(config: Config, command: AlertsCommands, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    match command {
        AlertsCommands::Unsent { limit } => {
            let alerts = store.unsent_alerts(limit).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&alerts)?),
                OutputFormat::Text => {
                    if alerts.is_empty() {
                        println!("No unsent alerts");
                    }
                    for alert in &alerts {
                        println!(
                            "#{:<6} {}  {:<16} {}",
                            alert.id,
                            alert.triggered_at.format("%Y-%m-%d %H:%M:%S"),
                            alert.rule.as_str(),
                            alert.message
                        );
                    }
                }
            }
        }
        AlertsCommands::Flush { limit } => {
            let clock: SharedClock = Arc::new(SystemClock);
            let notifier = Arc::new(Notifier::from_config(&config.notifier)?);
            let manager = NotificationManager::new(
                store,
                notifier,
                clock,
                config.notifications.batch_window(),
            );
            let delivered = manager.flush_unsent(limit).await;
            println!("Delivered {delivered} alerts");
        }
    }
    Ok(())
}

async fn run_db(config: Config, command: DbCommands) -> anyhow::Result<()> {
    match command {
        DbCommands::Migrate => {
            open_store(&config).await?;
            println!("Migrations applied to {}", config.database.url);
        }
    }
    Ok(())
}

async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown requested");
    token.cancel();
}
