// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test fixture: an in-memory bus with one sqlite account
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use billbus_core::Dispatcher;
use billbus_core::gateway::{GatewayFactory, SqliteGateway};
use billbus_core::migrations;
use billbus_core::registry::FileConfigStore;
use billbus_core::store::SqliteStore;

pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub async fn system_store() -> SqliteStore {
    let pool = memory_pool().await;
    migrations::run_sqlite(&pool).await.unwrap();
    SqliteStore::new(pool)
}

/// A complete bus over in-memory databases: system store, one account
/// ("001", the default) with its own pool, and a dispatcher wired to a
/// temporary config directory.
pub struct TestBus {
    pub config_dir: TempDir,
    pub config_store: Arc<FileConfigStore>,
    pub store: Arc<SqliteStore>,
    pub gateways: Arc<GatewayFactory>,
    pub dispatcher: Arc<Dispatcher>,
    pub account_pool: SqlitePool,
}

impl TestBus {
    pub async fn new() -> Self {
        let config_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            config_dir.path().join("accounts.json"),
            r#"{
                "default_account": "001",
                "accounts": {
                    "001": { "engine": "sqlite", "url": "sqlite::memory:" }
                }
            }"#,
        )
        .unwrap();

        let store = Arc::new(system_store().await);
        let config_store = Arc::new(FileConfigStore::new(config_dir.path()));
        let gateways = Arc::new(GatewayFactory::new(config_store.clone()));

        // The account gateway is registered up front so every component
        // sees the same in-memory database.
        let account_pool = memory_pool().await;
        gateways
            .register("001", Arc::new(SqliteGateway::new(account_pool.clone())))
            .await;

        let dispatcher = Arc::new(Dispatcher::new(
            config_store.clone(),
            gateways.clone(),
            store.clone(),
        ));

        TestBus {
            config_dir,
            config_store,
            store,
            gateways,
            dispatcher,
            account_pool,
        }
    }

    /// Install a document-type config for account 001.
    pub fn write_doc_type(&self, doctype: &str, json: &str) {
        let dir = self.config_dir.path().join("types").join("001");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{doctype}.json")), json).unwrap();
    }

    /// Install the task definition file.
    pub fn write_tasks(&self, json: &str) {
        std::fs::write(self.config_dir.path().join("tasks.json"), json).unwrap();
    }

    /// Create the bill head and line tables used by the write tests.
    pub async fn create_bill_tables(&self) {
        sqlx::query(
            "CREATE TABLE bills (\
                 iId INTEGER PRIMARY KEY AUTOINCREMENT, \
                 cCode TEXT, cMaker TEXT, iRows INTEGER, \
                 cSrcID TEXT, cCloser TEXT)",
        )
        .execute(&self.account_pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE bill_rows (\
                 iId INTEGER, iIds INTEGER, iRowNo INTEGER, \
                 cInvCode TEXT, iQty INTEGER NOT NULL, m_code TEXT)",
        )
        .execute(&self.account_pool)
        .await
        .unwrap();
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table}"))
            .fetch_one(&self.account_pool)
            .await
            .unwrap()
    }
}
