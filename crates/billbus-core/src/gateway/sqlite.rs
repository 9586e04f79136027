// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite account gateway

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, Sqlite, SqlitePool};

use crate::envelope::FieldMap;
use crate::error::Result;
use crate::template::{self, ParamStyle, SqlParams};

use super::{AccountDatabase, AccountTransaction};

/// [`AccountDatabase`] over a SQLite pool.
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Wrap an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        SqliteGateway { pool }
    }

    /// Connect a new pool to a SQLite URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(SqliteGateway { pool })
    }
}

fn row_to_fields(row: &SqliteRow) -> FieldMap {
    let mut fields = FieldMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        fields.insert(column.name().to_string(), column_text(row, idx));
    }
    fields
}

// Columns have no compile-time type; decode by falling through the
// storage classes and render everything as text. NULL becomes "".
fn column_text(row: &SqliteRow, idx: usize) -> String {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
    }
    String::new()
}

fn bind_all<'q>(
    sql: &'q str,
    binds: &'q [Option<String>],
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for value in binds {
        query = query.bind(value.as_deref());
    }
    query
}

#[async_trait]
impl AccountDatabase for SqliteGateway {
    async fn fetch_rows(&self, template: &str, params: &SqlParams) -> Result<Vec<FieldMap>> {
        let (sql, binds) = template::render(template, params, ParamStyle::Question);
        let rows = bind_all(&sql, &binds).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_fields).collect())
    }

    async fn execute(&self, template: &str, params: &SqlParams) -> Result<u64> {
        let (sql, binds) = template::render(template, params, ParamStyle::Question);
        let done = bind_all(&sql, &binds).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn AccountTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteAccountTx { tx }))
    }
}

struct SqliteAccountTx {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl AccountTransaction for SqliteAccountTx {
    async fn fetch_rows(&mut self, template: &str, params: &SqlParams) -> Result<Vec<FieldMap>> {
        let (sql, binds) = template::render(template, params, ParamStyle::Question);
        let rows = bind_all(&sql, &binds).fetch_all(&mut *self.tx).await?;
        Ok(rows.iter().map(row_to_fields).collect())
    }

    async fn execute(&mut self, template: &str, params: &SqlParams) -> Result<u64> {
        let (sql, binds) = template::render(template, params, ParamStyle::Question);
        let done = bind_all(&sql, &binds).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
