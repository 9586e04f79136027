// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL system store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::Result;
use crate::migrations;

use super::{AuditRecord, BusStore, MAX_TASK_ATTEMPTS, NewAuditEntry, NewTask, TaskRecord};

const TASK_COLUMNS: &str = "id, task_id, account_id, document_type, source_record_id, \
     op_tag, type_name, bill_code, define1, define2, define3, define4, define5, \
     done, attempt_count, result, attempted_at, created_at";

/// [`BusStore`] over a PostgreSQL pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool. The system schema must already be applied.
    pub fn new(pool: PgPool) -> Self {
        PostgresStore { pool }
    }

    /// Connect to a PostgreSQL URL and apply the system schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Ok(PostgresStore { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BusStore for PostgresStore {
    async fn insert_token(&self, token_id: &str, user_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tokens (token_id, user_id, issued_at, last_active) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(token_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_idle_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM tokens WHERE last_active < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn token_exists(&self, token_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tokens WHERE token_id = $1")
            .bind(token_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn touch_token(&self, token_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE tokens SET last_active = $1 WHERE token_id = $2")
            .bind(now)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (audit_id, logged_at, account_id, document_type, operator, \
             op_kind, ok, result, new_id, new_code, source_id, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now())
        .bind(&entry.account_id)
        .bind(&entry.document_type)
        .bind(&entry.operator)
        .bind(&entry.op_kind)
        .bind(entry.ok)
        .bind(&entry.result)
        .bind(&entry.new_id)
        .bind(&entry.new_code)
        .bind(&entry.source_id)
        .bind(&entry.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_successful_audit(
        &self,
        account_id: &str,
        document_type: &str,
        source_id: &str,
    ) -> Result<Option<AuditRecord>> {
        let record = sqlx::query_as::<_, AuditRecord>(
            "SELECT audit_id, logged_at, account_id, document_type, operator, op_kind, ok, \
             result, new_id, new_code, source_id, payload \
             FROM audit_log \
             WHERE account_id = $1 AND document_type = $2 AND source_id = $3 AND ok \
             ORDER BY logged_at DESC LIMIT 1",
        )
        .bind(account_id)
        .bind(document_type)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn enqueue_task(&self, task: &NewTask) -> Result<bool> {
        let done = sqlx::query(
            "INSERT INTO tasks (task_id, account_id, document_type, source_record_id, op_tag, \
             type_name, bill_code, define1, define2, define3, define4, define5, \
             done, attempt_count, result, created_at) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, FALSE, 0, '', $13 \
             WHERE NOT EXISTS (\
                 SELECT 1 FROM tasks \
                 WHERE account_id = $14 AND source_record_id = $15 AND document_type = $16 \
                   AND op_tag = $17 AND NOT done AND attempt_count < $18\
             )",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&task.account_id)
        .bind(&task.document_type)
        .bind(&task.source_record_id)
        .bind(&task.op_tag)
        .bind(&task.type_name)
        .bind(&task.bill_code)
        .bind(&task.define1)
        .bind(&task.define2)
        .bind(&task.define3)
        .bind(&task.define4)
        .bind(&task.define5)
        .bind(Utc::now())
        .bind(&task.account_id)
        .bind(&task.source_record_id)
        .bind(&task.document_type)
        .bind(&task.op_tag)
        .bind(MAX_TASK_ATTEMPTS)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn pending_tasks(&self, limit: i64) -> Result<Vec<TaskRecord>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE NOT done AND attempt_count < $1 ORDER BY id LIMIT $2"
        );
        let tasks = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(MAX_TASK_ATTEMPTS)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(tasks)
    }

    async fn record_task_attempt(
        &self,
        task_id: &str,
        ok: bool,
        result: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET done = $1, result = $2, attempt_count = attempt_count + 1, \
             attempted_at = $3 WHERE task_id = $4",
        )
        .bind(ok)
        .bind(result)
        .bind(at)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1");
        let task = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn watermark(&self, account_id: &str, document_type: &str) -> Result<String> {
        sqlx::query(
            "INSERT INTO watermarks (account_id, document_type, value) VALUES ($1, $2, '') \
             ON CONFLICT (account_id, document_type) DO NOTHING",
        )
        .bind(account_id)
        .bind(document_type)
        .execute(&self.pool)
        .await?;
        let value: String = sqlx::query_scalar(
            "SELECT value FROM watermarks WHERE account_id = $1 AND document_type = $2",
        )
        .bind(account_id)
        .bind(document_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_watermark(
        &self,
        account_id: &str,
        document_type: &str,
        value: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO watermarks (account_id, document_type, value) VALUES ($1, $2, $3) \
             ON CONFLICT (account_id, document_type) DO UPDATE SET value = excluded.value",
        )
        .bind(account_id)
        .bind(document_type)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
