// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! billbus server binary
//!
//! Bootstraps the system store, the dispatcher and the task engine, then
//! serves the JSON/XML surfaces until interrupted.

use std::sync::Arc;

use anyhow::Result;
use billbus_core::engine::{EngineConfig, TaskEngine};
use billbus_core::gateway::GatewayFactory;
use billbus_core::registry::{DatabaseEngine, FileConfigStore};
use billbus_core::store::{BusStore, PostgresStore, SqliteStore};
use billbus_core::Dispatcher;
use tracing::{error, info};

use billbus_server::config::Config;
use billbus_server::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("billbus_core=info".parse().unwrap())
                .add_directive("billbus_server=info".parse().unwrap()),
        )
        .init();

    info!("Starting billbus");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        config_dir = %config.config_dir.display(),
        engine = ?config.database_engine,
        "Configuration loaded"
    );

    info!("Connecting system store...");
    let store: Arc<dyn BusStore> = match config.database_engine {
        DatabaseEngine::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
        DatabaseEngine::Postgres => Arc::new(PostgresStore::connect(&config.database_url).await?),
    };
    info!("System store ready, migrations applied");

    let config_store = Arc::new(FileConfigStore::new(&config.config_dir));
    let gateways = Arc::new(GatewayFactory::new(config_store.clone()));
    let dispatcher = Arc::new(
        Dispatcher::new(config_store.clone(), gateways.clone(), store.clone())
            .with_log_dir(&config.log_dir),
    );

    let engine = TaskEngine::new(
        config_store,
        gateways,
        store,
        dispatcher.clone(),
        EngineConfig {
            poll_interval: config.poll_interval,
            batch_size: config.batch_size,
        },
    );
    let engine_shutdown = engine.shutdown_handle();
    let engine_handle = tokio::spawn(engine.run());

    let app = router(AppState { dispatcher });
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down...");
    engine_shutdown.notify_one();
    let _ = engine_handle.await;
    info!("Shutdown complete");

    Ok(())
}
