// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forwarding handler: relay a local document to a remote bus
//!
//! A write on a forwarding document type reads the local record through
//! the `find` template (plus `find_body` for line items when configured),
//! reshapes it into a generic write request addressed to the configured
//! remote (account, document type) pair, and POSTs it to the remote
//! endpoint. The remote envelope decides the local outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::dispatch::{DocumentHandler, HandlerContext, WriteOutcome};
use crate::envelope::{Envelope, FieldMap, field};
use crate::error::{BusError, Result};
use crate::handlers::GenericHandler;
use crate::request::DocumentRequest;
use crate::template::SqlParams;

/// Outbound relay call timeout
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(60);

/// Relays local documents to a remote bus endpoint.
pub struct ForwardHandler;

impl ForwardHandler {
    fn write_trace(ctx: &HandlerContext<'_>, request: &DocumentRequest, payload: &serde_json::Value) {
        let Some(dir) = ctx.log_dir else {
            return;
        };
        let op_tag = field(&request.head, "cOpTag")
            .cloned()
            .unwrap_or_else(|| "relay".to_string());
        let name = format!("{}_{}_{}.txt", ctx.account_id, ctx.document_type, op_tag);
        let _ = std::fs::create_dir_all(dir);
        if let Err(err) = std::fs::write(dir.join(name), payload.to_string()) {
            debug!(error = %err, "relay trace write failed");
        }
    }
}

#[async_trait]
impl DocumentHandler for ForwardHandler {
    async fn fetch(
        &self,
        ctx: &HandlerContext<'_>,
        request: &DocumentRequest,
    ) -> Result<Vec<FieldMap>> {
        // Reads on a forwarding type are plain local reads.
        GenericHandler.fetch(ctx, request).await
    }

    async fn write(
        &self,
        ctx: &HandlerContext<'_>,
        request: &DocumentRequest,
    ) -> Result<WriteOutcome> {
        let forward = ctx.config.forward.as_ref().ok_or_else(|| {
            BusError::Template(format!(
                "document type '{}' has no forward target",
                ctx.document_type
            ))
        })?;
        let find_sql = ctx.config.sql.find.as_deref().ok_or_else(|| {
            BusError::Template(format!(
                "document type '{}' has no find template",
                ctx.document_type
            ))
        })?;

        let params = SqlParams::from_fields(&request.head);
        let sql = super::generic::apply_where(find_sql, request.where_clause.as_deref());
        let rows = ctx.db.fetch_rows(&sql, &params).await?;
        let head = rows.into_iter().next().ok_or(BusError::NoSourceRecord)?;

        let mut payload = json!({
            "accno": forward.to_account,
            "billtype": forward.to_document_type,
            "head": head,
        });
        if let Some(body_sql) = ctx.config.sql.find_body.as_deref() {
            let body_rows = ctx.db.fetch_rows(body_sql, &params).await?;
            if !body_rows.is_empty() {
                payload["body"] = json!(body_rows);
            }
        }

        Self::write_trace(ctx, request, &payload);

        let method = reqwest::Method::from_bytes(forward.method.as_bytes())
            .map_err(|_| BusError::RemoteCallFailed(format!("bad method '{}'", forward.method)))?;
        let response = ctx
            .http
            .request(method, &forward.url)
            .timeout(RELAY_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|err| BusError::RemoteCallFailed(err.to_string()))?;
        let remote: Envelope = response
            .json()
            .await
            .map_err(|err| BusError::RemoteCallFailed(err.to_string()))?;

        if remote.is_ok() {
            info!(
                url = %forward.url,
                new_id = %remote.new_bill_id,
                "relay accepted"
            );
            Ok(WriteOutcome {
                new_id: remote.new_bill_id,
                new_code: remote.new_bill_code,
                desc: remote.desc,
            })
        } else {
            Err(BusError::RemoteRejected(remote.desc))
        }
    }
}
