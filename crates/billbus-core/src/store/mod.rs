// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! System store: tokens, audit log, task queue and watermarks
//!
//! The system store is the bus's own database, separate from the account
//! business databases. It backs the token guard, the write audit log, the
//! durable task queue and the change-detection watermarks. Two
//! implementations exist behind [`BusStore`], one per supported engine.

mod postgres;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::error::Result;

/// Retry cap: a task failing this many attempts is terminal-failed and
/// leaves the dispatch rotation.
pub const MAX_TASK_ATTEMPTS: i32 = 3;

/// One persisted write-attempt audit row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    /// Row id
    pub audit_id: String,
    /// Time the attempt was logged
    pub logged_at: DateTime<Utc>,
    /// Account the write addressed
    pub account_id: String,
    /// Document type the write addressed
    pub document_type: String,
    /// Operator recorded for the write
    pub operator: String,
    /// Operation kind, e.g. `write`
    pub op_kind: String,
    /// Whether the attempt succeeded
    pub ok: bool,
    /// Result description
    pub result: String,
    /// New head identity on success
    pub new_id: String,
    /// New head code on success
    pub new_code: String,
    /// Caller's source-system id, empty when none was given
    pub source_id: String,
    /// Raw request payload when the type opts into payload logging
    pub payload: String,
}

/// Audit entry to append; id and timestamp are assigned by the store
#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry {
    /// Account the write addressed
    pub account_id: String,
    /// Document type the write addressed
    pub document_type: String,
    /// Operator recorded for the write
    pub operator: String,
    /// Operation kind
    pub op_kind: String,
    /// Whether the attempt succeeded
    pub ok: bool,
    /// Result description
    pub result: String,
    /// New head identity on success
    pub new_id: String,
    /// New head code on success
    pub new_code: String,
    /// Caller's source-system id
    pub source_id: String,
    /// Raw request payload, empty unless the type opts in
    pub payload: String,
}

/// One queued integration task
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    /// Creation-ordered row id, the batch dispatch order
    pub id: i64,
    /// Stable task key used for attempt write-back
    pub task_id: String,
    /// Account the task dispatches against
    pub account_id: String,
    /// Document type the task dispatches as
    pub document_type: String,
    /// Identity of the changed source record
    pub source_record_id: String,
    /// Operation tag carried from the source row
    pub op_tag: String,
    /// Display name of the document type at the source
    pub type_name: String,
    /// Document code at the source
    pub bill_code: String,
    /// Free passthrough column 1
    pub define1: String,
    /// Free passthrough column 2
    pub define2: String,
    /// Free passthrough column 3
    pub define3: String,
    /// Free passthrough column 4
    pub define4: String,
    /// Free passthrough column 5
    pub define5: String,
    /// Whether a dispatch attempt succeeded
    pub done: bool,
    /// Number of dispatch attempts so far
    pub attempt_count: i32,
    /// Result description of the last attempt
    pub result: String,
    /// Time of the last attempt
    pub attempted_at: Option<DateTime<Utc>>,
    /// Enqueue time
    pub created_at: DateTime<Utc>,
}

/// Task to enqueue; id, task id and timestamps are assigned by the store
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Account the task dispatches against
    pub account_id: String,
    /// Document type the task dispatches as
    pub document_type: String,
    /// Identity of the changed source record
    pub source_record_id: String,
    /// Operation tag carried from the source row
    pub op_tag: String,
    /// Display name of the document type at the source
    pub type_name: String,
    /// Document code at the source
    pub bill_code: String,
    /// Free passthrough column 1
    pub define1: String,
    /// Free passthrough column 2
    pub define2: String,
    /// Free passthrough column 3
    pub define3: String,
    /// Free passthrough column 4
    pub define4: String,
    /// Free passthrough column 5
    pub define5: String,
}

/// Persistence operations of the system store.
#[async_trait]
pub trait BusStore: Send + Sync {
    /// Insert a freshly issued token.
    async fn insert_token(&self, token_id: &str, user_id: &str) -> Result<()>;

    /// Delete tokens idle since before the cutoff, returning the count.
    async fn purge_idle_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Whether a token currently exists.
    async fn token_exists(&self, token_id: &str) -> Result<bool>;

    /// Slide a token's activity window forward.
    async fn touch_token(&self, token_id: &str, now: DateTime<Utc>) -> Result<()>;

    /// Append one audit row.
    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<()>;

    /// Earlier successful write for the same account, type and source id.
    async fn find_successful_audit(
        &self,
        account_id: &str,
        document_type: &str,
        source_id: &str,
    ) -> Result<Option<AuditRecord>>;

    /// Enqueue a task unless an unresolved under-cap task already exists
    /// for the same (account, source record, type, op tag) key. Returns
    /// whether a row was inserted.
    async fn enqueue_task(&self, task: &NewTask) -> Result<bool>;

    /// Unresolved under-cap tasks in creation order, bounded by `limit`.
    async fn pending_tasks(&self, limit: i64) -> Result<Vec<TaskRecord>>;

    /// Write back one dispatch attempt: outcome, result description,
    /// attempt counter increment and attempt time.
    async fn record_task_attempt(
        &self,
        task_id: &str,
        ok: bool,
        result: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Look up one task by its stable key.
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Current watermark for a detection stream, initializing an empty
    /// one on first access.
    async fn watermark(&self, account_id: &str, document_type: &str) -> Result<String>;

    /// Advance a watermark.
    async fn set_watermark(&self, account_id: &str, document_type: &str, value: &str)
    -> Result<()>;
}
