// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded system-schema migrations
//!
//! One migration directory per engine; the schemas are equivalent apart
//! from engine-native column types.

use sqlx::migrate::Migrator;
use sqlx::{PgPool, SqlitePool};

use crate::error::Result;

/// Migrator for PostgreSQL system stores
pub static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");

/// Migrator for SQLite system stores
pub static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

/// Apply system migrations to a PostgreSQL pool.
pub async fn run_postgres(pool: &PgPool) -> Result<()> {
    POSTGRES_MIGRATOR.run(pool).await?;
    Ok(())
}

/// Apply system migrations to a SQLite pool.
pub async fn run_sqlite(pool: &SqlitePool) -> Result<()> {
    SQLITE_MIGRATOR.run(pool).await?;
    Ok(())
}
