//! Startup health checks

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{database_path, SharedStore};

/// Result of one check
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Check name
    pub name: &'static str,
    /// Whether it passed
    pub healthy: bool,
    /// What was found
    pub detail: String,
}

/// Results of every check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Individual results
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Whether every check passed
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|c| c.healthy)
    }
}

/// Checks database connectivity, working directories and configuration
pub struct HealthMonitor<'a> {
    store: SharedStore,
    config: &'a Config,
    root: PathBuf,
}

impl<'a> HealthMonitor<'a> {
    /// Monitor with directories resolved against the working directory
    pub fn new(store: SharedStore, config: &'a Config) -> Self {
        Self::with_root(store, config, PathBuf::from("."))
    }

    /// Monitor with directories resolved against `root`
    pub fn with_root(store: SharedStore, config: &'a Config, root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            config,
            root: root.into(),
        }
    }

    /// Run every check, logging each outcome
    pub async fn check(&self) -> HealthReport {
        let checks = vec![
            self.check_database().await,
            self.check_directories(),
            self.check_configuration(),
        ];

        for check in &checks {
            if check.healthy {
                info!(check = check.name, detail = %check.detail, "Health check passed");
            } else {
                error!(check = check.name, detail = %check.detail, "Health check failed");
            }
        }

        HealthReport { checks }
    }

    async fn check_database(&self) -> HealthCheck {
        match self.store.health_check().await {
            Ok(()) => HealthCheck {
                name: "database",
                healthy: true,
                detail: format!("connected to {}", self.config.database.url),
            },
            Err(e) => HealthCheck {
                name: "database",
                healthy: false,
                detail: e.to_string(),
            },
        }
    }

    fn required_directories(&self) -> Vec<PathBuf> {
        let data = database_path(&self.config.database.url)
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("data"));
        let logs = self
            .config
            .logging
            .directory
            .as_deref()
            .map_or_else(|| PathBuf::from("logs"), PathBuf::from);

        vec![data, logs, PathBuf::from("config")]
    }

    fn check_directories(&self) -> HealthCheck {
        let mut created = Vec::new();

        for dir in self.required_directories() {
            let path = if dir.is_absolute() { dir } else { self.root.join(dir) };
            if path.is_dir() {
                continue;
            }
            if let Err(e) = std::fs::create_dir_all(&path) {
                return HealthCheck {
                    name: "directories",
                    healthy: false,
                    detail: format!("cannot create {}: {}", path.display(), e),
                };
            }
            info!(path = %path.display(), "Created directory");
            created.push(path.display().to_string());
        }

        HealthCheck {
            name: "directories",
            healthy: true,
            detail: if created.is_empty() {
                "all present".to_string()
            } else {
                format!("created {}", created.join(", "))
            },
        }
    }

    fn check_configuration(&self) -> HealthCheck {
        let warnings = self.config.validate();
        for warning in &warnings {
            warn!("Configuration: {}", warning);
        }

        let enabled = self.config.sources.iter().filter(|s| s.enabled).count();
        HealthCheck {
            name: "configuration",
            healthy: true,
            detail: format!(
                "{} sources ({} enabled), {} warnings",
                self.config.sources.len(),
                enabled,
                warnings.len()
            ),
        }
    }
}
