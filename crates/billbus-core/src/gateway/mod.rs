// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-account database gateways
//!
//! Every account owns its own business database, reachable only through
//! configuration-supplied SQL templates. The gateway traits expose the
//! small surface the handlers need (row queries as flat string maps,
//! statements, transactions); sqlite and postgres implementations live in
//! the submodules. The [`GatewayFactory`] lazily connects one pool per
//! account and hands out shared gateways.

mod postgres;
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

pub use postgres::PostgresGateway;
pub use sqlite::SqliteGateway;

use crate::envelope::FieldMap;
use crate::error::{BusError, Result};
use crate::registry::{ConfigStore, DatabaseEngine};
use crate::template::SqlParams;

/// Query and statement access to one account database.
#[async_trait]
pub trait AccountDatabase: Send + Sync {
    /// Run a `@name`-parameterized query and collect rows as string maps.
    async fn fetch_rows(&self, template: &str, params: &SqlParams) -> Result<Vec<FieldMap>>;

    /// Run a `@name`-parameterized statement, returning affected rows.
    async fn execute(&self, template: &str, params: &SqlParams) -> Result<u64>;

    /// Open a transaction on the account database.
    async fn begin(&self) -> Result<Box<dyn AccountTransaction>>;
}

/// One open transaction on an account database.
///
/// Dropping the box without calling either finisher rolls the
/// transaction back, which is the behavior the write pipeline relies on.
#[async_trait]
pub trait AccountTransaction: Send {
    /// Run a query inside the transaction.
    async fn fetch_rows(&mut self, template: &str, params: &SqlParams) -> Result<Vec<FieldMap>>;

    /// Run a statement inside the transaction.
    async fn execute(&mut self, template: &str, params: &SqlParams) -> Result<u64>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Lazily-connecting cache of one gateway per account.
pub struct GatewayFactory {
    config: Arc<dyn ConfigStore>,
    gateways: RwLock<HashMap<String, Arc<dyn AccountDatabase>>>,
}

impl GatewayFactory {
    /// Create a factory over a configuration store.
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        GatewayFactory {
            config,
            gateways: RwLock::new(HashMap::new()),
        }
    }

    /// Gateway for an account, connecting on first use.
    pub async fn account_db(&self, account_id: &str) -> Result<Arc<dyn AccountDatabase>> {
        if let Some(db) = self.gateways.read().await.get(account_id) {
            return Ok(db.clone());
        }
        let account = self.config.account(account_id).map_err(BusError::from)?;
        let db: Arc<dyn AccountDatabase> = match account.engine {
            DatabaseEngine::Sqlite => Arc::new(SqliteGateway::connect(&account.url).await?),
            DatabaseEngine::Postgres => Arc::new(PostgresGateway::connect(&account.url).await?),
        };
        info!(account_id, engine = ?account.engine, "account database connected");
        let mut gateways = self.gateways.write().await;
        Ok(gateways
            .entry(account_id.to_string())
            .or_insert(db)
            .clone())
    }

    /// Install a pre-built gateway for an account, replacing lazy
    /// connection. Used where the pool is constructed elsewhere.
    pub async fn register(&self, account_id: &str, db: Arc<dyn AccountDatabase>) {
        self.gateways
            .write()
            .await
            .insert(account_id.to_string(), db);
    }
}
