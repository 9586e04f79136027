// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL account gateway
//!
//! Parameters bind as text; templates cast (`@qty::int`) where a column
//! is not text. Decoding renders every supported column type back to its
//! string form.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, Row};

use crate::envelope::FieldMap;
use crate::error::Result;
use crate::template::{self, ParamStyle, SqlParams};

use super::{AccountDatabase, AccountTransaction};

/// [`AccountDatabase`] over a PostgreSQL pool.
pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        PostgresGateway { pool }
    }

    /// Connect a new pool to a PostgreSQL URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(PostgresGateway { pool })
    }
}

fn row_to_fields(row: &PgRow) -> FieldMap {
    let mut fields = FieldMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        fields.insert(column.name().to_string(), column_text(row, idx));
    }
    fields
}

fn column_text(row: &PgRow, idx: usize) -> String {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return v.map(|v| v.to_rfc3339()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return v.map(|v| v.to_string()).unwrap_or_default();
    }
    String::new()
}

fn bind_all<'q>(
    sql: &'q str,
    binds: &'q [Option<String>],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    let mut query = sqlx::query(sql);
    for value in binds {
        query = query.bind(value.as_deref());
    }
    query
}

#[async_trait]
impl AccountDatabase for PostgresGateway {
    async fn fetch_rows(&self, template: &str, params: &SqlParams) -> Result<Vec<FieldMap>> {
        let (sql, binds) = template::render(template, params, ParamStyle::Numbered);
        let rows = bind_all(&sql, &binds).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_fields).collect())
    }

    async fn execute(&self, template: &str, params: &SqlParams) -> Result<u64> {
        let (sql, binds) = template::render(template, params, ParamStyle::Numbered);
        let done = bind_all(&sql, &binds).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn AccountTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresAccountTx { tx }))
    }
}

struct PostgresAccountTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountTransaction for PostgresAccountTx {
    async fn fetch_rows(&mut self, template: &str, params: &SqlParams) -> Result<Vec<FieldMap>> {
        let (sql, binds) = template::render(template, params, ParamStyle::Numbered);
        let rows = bind_all(&sql, &binds).fetch_all(&mut *self.tx).await?;
        Ok(rows.iter().map(row_to_fields).collect())
    }

    async fn execute(&mut self, template: &str, params: &SqlParams) -> Result<u64> {
        let (sql, binds) = template::render(template, params, ParamStyle::Numbered);
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
