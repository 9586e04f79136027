// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server configuration from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use billbus_core::registry::DatabaseEngine;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("missing environment variable: {0}")]
    Missing(String),

    /// An environment variable holds an unparseable value
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// System-store connection URL (`BILLBUS_DATABASE_URL`)
    pub database_url: String,
    /// Engine of the system store, derived from the URL scheme
    pub database_engine: DatabaseEngine,
    /// HTTP listen address (`BILLBUS_HTTP_ADDR`, default `0.0.0.0:8080`)
    pub http_addr: SocketAddr,
    /// Business metadata directory (`BILLBUS_CONFIG_DIR`, default `./config`)
    pub config_dir: PathBuf,
    /// Log/trace file directory (`BILLBUS_LOG_DIR`, default `./logs`)
    pub log_dir: PathBuf,
    /// Task engine pass interval (`BILLBUS_TASK_INTERVAL_SECS`, default 60)
    pub poll_interval: Duration,
    /// Task engine dispatch batch size (`BILLBUS_TASK_BATCH_SIZE`, default 10000)
    pub batch_size: i64,
}

fn parsed<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(name.to_string(), value))
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("BILLBUS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("BILLBUS_DATABASE_URL".to_string()))?;
        let database_engine = if database_url.starts_with("postgres") {
            DatabaseEngine::Postgres
        } else if database_url.starts_with("sqlite") {
            DatabaseEngine::Sqlite
        } else {
            return Err(ConfigError::Invalid(
                "BILLBUS_DATABASE_URL".to_string(),
                database_url,
            ));
        };

        let http_addr = parsed(
            "BILLBUS_HTTP_ADDR",
            std::env::var("BILLBUS_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        )?;
        let poll_secs: u64 = parsed(
            "BILLBUS_TASK_INTERVAL_SECS",
            std::env::var("BILLBUS_TASK_INTERVAL_SECS").unwrap_or_else(|_| "60".to_string()),
        )?;
        let batch_size = parsed(
            "BILLBUS_TASK_BATCH_SIZE",
            std::env::var("BILLBUS_TASK_BATCH_SIZE").unwrap_or_else(|_| "10000".to_string()),
        )?;

        Ok(Config {
            database_url,
            database_engine,
            http_addr,
            config_dir: std::env::var("BILLBUS_CONFIG_DIR")
                .unwrap_or_else(|_| "./config".to_string())
                .into(),
            log_dir: std::env::var("BILLBUS_LOG_DIR")
                .unwrap_or_else(|_| "./logs".to_string())
                .into(),
            poll_interval: Duration::from_secs(poll_secs),
            batch_size,
        })
    }
}
