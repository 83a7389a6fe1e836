// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::webhooks::JoinPolicy;

/// Runtara Tables configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum pooled database connections
    pub max_connections: u32,
    /// Public base URL of the platform, used to address flow webhooks
    pub public_url: Option<String>,
    /// Per-request timeout for HTTP webhook delivery
    pub webhook_timeout: Duration,
    /// How webhook fan-out treats individual delivery failures
    pub webhook_join_policy: JoinPolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RUNTARA_TABLES_DATABASE_URL` (or `RUNTARA_DATABASE_URL`): PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `RUNTARA_TABLES_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `RUNTARA_PUBLIC_URL`: public base URL (default: unset)
    /// - `RUNTARA_TABLES_WEBHOOK_TIMEOUT_SECS`: webhook delivery timeout (default: 30)
    /// - `RUNTARA_TABLES_WEBHOOK_JOIN_POLICY`: `best_effort` or `wait_for_all` (default: best_effort)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RUNTARA_TABLES_DATABASE_URL")
            .or_else(|_| std::env::var("RUNTARA_DATABASE_URL"))
            .map_err(|_| {
                ConfigError::Missing("RUNTARA_TABLES_DATABASE_URL or RUNTARA_DATABASE_URL")
            })?;

        let max_connections: u32 = std::env::var("RUNTARA_TABLES_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "RUNTARA_TABLES_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let public_url = std::env::var("RUNTARA_PUBLIC_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let timeout_secs: u64 = std::env::var("RUNTARA_TABLES_WEBHOOK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "RUNTARA_TABLES_WEBHOOK_TIMEOUT_SECS",
                "must be a positive integer",
            ))?;

        let webhook_join_policy = match std::env::var("RUNTARA_TABLES_WEBHOOK_JOIN_POLICY")
            .unwrap_or_else(|_| "best_effort".to_string())
            .as_str()
        {
            "best_effort" => JoinPolicy::BestEffort,
            "wait_for_all" => JoinPolicy::WaitForAll,
            _ => {
                return Err(ConfigError::Invalid(
                    "RUNTARA_TABLES_WEBHOOK_JOIN_POLICY",
                    "must be 'best_effort' or 'wait_for_all'",
                ));
            }
        };

        Ok(Self {
            database_url,
            max_connections,
            public_url,
            webhook_timeout: Duration::from_secs(timeout_secs),
            webhook_join_policy,
        })
    }

    /// Whether the database URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }
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
