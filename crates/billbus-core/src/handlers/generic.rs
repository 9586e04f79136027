// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic handler: template-driven read and transactional write
//!
//! The write pipeline runs entirely inside one transaction on the
//! account database:
//!
//! 1. `save_head` inserts the head and must return one row with `iId`
//!    (new identity), `cCode` (generated code) and `iIds` (current max
//!    body sub-id).
//! 2. `save_body` runs once per body row with `@iId`, a consecutive
//!    `@iIds`, `@iRowNo`, every item field, and every head-result column
//!    re-prefixed `m_`. Item values that are empty or `"-"` bind NULL.
//! 3. `after_save`, when configured, runs with `@iId`.
//!
//! Any step failing rolls the whole document back.

use async_trait::async_trait;
use tracing::warn;

use crate::dispatch::{DocumentHandler, HandlerContext, WriteOutcome};
use crate::envelope::{FieldMap, field};
use crate::error::{BusError, Result};
use crate::gateway::AccountTransaction;
use crate::request::DocumentRequest;
use crate::template::{self, SqlParams};

/// Head-result column carrying the new identity
pub const HEAD_ID_COLUMN: &str = "iId";
/// Head-result column carrying the generated code
pub const HEAD_CODE_COLUMN: &str = "cCode";
/// Head-result column carrying the current max body sub-id
pub const HEAD_SUBID_COLUMN: &str = "iIds";

/// The default, fully metadata-driven handler.
pub struct GenericHandler;

// Empty and "-" mean "no value" in caller payloads.
fn normalized(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Render the caller filter into the `{where}` placeholder of a find
/// template. A present filter is prefixed `And `; an absent one splices
/// to nothing.
pub fn apply_where(template: &str, where_clause: Option<&str>) -> String {
    let fragment = match where_clause.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => format!("And {w}"),
        None => String::new(),
    };
    template::splice(template, "{where}", &fragment)
}

async fn write_document(
    tx: &mut dyn AccountTransaction,
    ctx: &HandlerContext<'_>,
    request: &DocumentRequest,
) -> Result<WriteOutcome> {
    let head_sql = ctx.config.sql.save_head.as_deref().ok_or_else(|| {
        BusError::Template(format!(
            "document type '{}' has no save_head template",
            ctx.document_type
        ))
    })?;

    let mut head_params = SqlParams::from_fields(&request.head);
    if field(&request.head, "cMaker").is_none_or(|v| v.is_empty()) {
        head_params.set("cMaker", ctx.config.default_maker.clone());
    }
    head_params.set("iRows", request.body.len().to_string());

    let head_rows = tx.fetch_rows(head_sql, &head_params).await?;
    let head_row = head_rows.first().ok_or_else(|| {
        BusError::TransactionFailure("save_head returned no result row".to_string())
    })?;

    let new_id = field(head_row, HEAD_ID_COLUMN).cloned().unwrap_or_default();
    if new_id.is_empty() {
        return Err(BusError::TransactionFailure(format!(
            "save_head result is missing the {HEAD_ID_COLUMN} column"
        )));
    }
    let new_code = field(head_row, HEAD_CODE_COLUMN).cloned().unwrap_or_default();
    let sub_id_base: i64 = field(head_row, HEAD_SUBID_COLUMN)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if !request.body.is_empty() {
        let body_sql = ctx.config.sql.save_body.as_deref().ok_or_else(|| {
            BusError::Template(format!(
                "document type '{}' has body rows but no save_body template",
                ctx.document_type
            ))
        })?;
        for (idx, item) in request.body.iter().enumerate() {
            let mut params = SqlParams::new();
            for (name, value) in item {
                params.set_opt(name, normalized(value));
            }
            // Head-result columns are visible to body inserts under m_.
            for (name, value) in head_row {
                params.set(&format!("m_{name}"), value.clone());
            }
            params.set(HEAD_ID_COLUMN, new_id.clone());
            params.set(HEAD_SUBID_COLUMN, (sub_id_base + idx as i64 + 1).to_string());
            let row_no = field(item, "iRowNo")
                .cloned()
                .unwrap_or_else(|| (idx + 1).to_string());
            params.set("iRowNo", row_no);
            tx.execute(body_sql, &params).await?;
        }
    }

    if let Some(after_sql) = ctx.config.sql.after_save.as_deref() {
        let mut params = SqlParams::new();
        params.set(HEAD_ID_COLUMN, new_id.clone());
        tx.execute(after_sql, &params).await?;
    }

    Ok(WriteOutcome {
        desc: new_code.clone(),
        new_id,
        new_code,
    })
}

#[async_trait]
impl DocumentHandler for GenericHandler {
    async fn fetch(
        &self,
        ctx: &HandlerContext<'_>,
        request: &DocumentRequest,
    ) -> Result<Vec<FieldMap>> {
        let find_sql = ctx.config.sql.find.as_deref().ok_or_else(|| {
            BusError::Template(format!(
                "document type '{}' has no find template",
                ctx.document_type
            ))
        })?;
        let sql = apply_where(find_sql, request.where_clause.as_deref());
        let params = SqlParams::from_fields(&request.head);
        ctx.db.fetch_rows(&sql, &params).await
    }

    async fn write(
        &self,
        ctx: &HandlerContext<'_>,
        request: &DocumentRequest,
    ) -> Result<WriteOutcome> {
        let mut tx = ctx.db.begin().await?;
        match write_document(tx.as_mut(), ctx, request).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                match err {
                    wrapped @ (BusError::TransactionFailure(_) | BusError::Template(_)) => {
                        Err(wrapped)
                    }
                    other => Err(BusError::TransactionFailure(other.to_string())),
                }
            }
        }
    }
}
