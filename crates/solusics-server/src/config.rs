// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Storage backend selected by the database URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    /// `postgres://` or `postgresql://`
    Postgres,
    /// `sqlite:`
    Sqlite,
}

impl DatabaseBackend {
    /// Detect the backend from a connection URL.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else {
            None
        }
    }
}

/// Solusics server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Backend derived from `database_url`
    pub database_backend: DatabaseBackend,
    /// Messaging gateway proxy function URL
    pub gateway_url: String,
    /// Bearer token for the gateway, if any
    pub gateway_token: Option<String>,
    /// Client-side timeout for gateway calls
    pub gateway_timeout: Duration,
    /// HTTP API bind address
    pub http_addr: SocketAddr,
    /// How often the QR watcher polls scanning tenants
    pub qr_poll_interval: Duration,
    /// How long an issued QR code stays valid
    pub qr_lifetime: Duration,
    /// How often the recovery worker looks for abandoned intents
    pub recovery_interval: Duration,
    /// Age after which an unresolved intent is recovered
    pub recovery_threshold: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `SOLUSICS_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `SOLUSICS_GATEWAY_URL`: gateway proxy function URL
    ///
    /// Optional (with defaults):
    /// - `SOLUSICS_GATEWAY_TOKEN`: bearer token (default: none)
    /// - `SOLUSICS_GATEWAY_TIMEOUT_MS`: gateway timeout (default: 15000)
    /// - `SOLUSICS_HTTP_PORT`: HTTP API port (default: 8080)
    /// - `SOLUSICS_QR_POLL_INTERVAL_SECS`: QR watcher interval (default: 5)
    /// - `SOLUSICS_QR_LIFETIME_SECS`: QR validity (default: 120)
    /// - `SOLUSICS_RECOVERY_INTERVAL_SECS`: recovery interval (default: 30)
    /// - `SOLUSICS_RECOVERY_THRESHOLD_SECS`: intent age before recovery (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("SOLUSICS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("SOLUSICS_DATABASE_URL"))?;
        let database_backend = DatabaseBackend::from_url(&database_url).ok_or(
            ConfigError::Invalid(
                "SOLUSICS_DATABASE_URL",
                "must start with postgres://, postgresql:// or sqlite:",
            ),
        )?;

        let gateway_url = std::env::var("SOLUSICS_GATEWAY_URL")
            .map_err(|_| ConfigError::Missing("SOLUSICS_GATEWAY_URL"))?;
        if !(gateway_url.starts_with("http://") || gateway_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(
                "SOLUSICS_GATEWAY_URL",
                "must be an http:// or https:// URL",
            ));
        }

        let gateway_token = std::env::var("SOLUSICS_GATEWAY_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let gateway_timeout =
            Duration::from_millis(positive_var("SOLUSICS_GATEWAY_TIMEOUT_MS", 15_000)?);

        let http_port: u16 = std::env::var("SOLUSICS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("SOLUSICS_HTTP_PORT", "must be a valid port number")
            })?;

        Ok(Self {
            database_url,
            database_backend,
            gateway_url,
            gateway_token,
            gateway_timeout,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            qr_poll_interval: Duration::from_secs(positive_var(
                "SOLUSICS_QR_POLL_INTERVAL_SECS",
                5,
            )?),
            qr_lifetime: Duration::from_secs(positive_var("SOLUSICS_QR_LIFETIME_SECS", 120)?),
            recovery_interval: Duration::from_secs(positive_var(
                "SOLUSICS_RECOVERY_INTERVAL_SECS",
                30,
            )?),
            recovery_threshold: Duration::from_secs(positive_var(
                "SOLUSICS_RECOVERY_THRESHOLD_SECS",
                60,
            )?),
        })
    }
}

fn positive_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let value = match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(name, "must be a positive integer"))?,
        Err(_) => default,
    };
    if value == 0 {
        return Err(ConfigError::Invalid(name, "must be a positive integer"));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
