// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Write-attempt audit log
//!
//! Every write attempt that reaches a handler is recorded, success and
//! failure alike. An audit append must never fail the write it describes:
//! store errors are logged and mirrored to a best-effort fallback file so
//! the attempt is not lost entirely.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::error::{BusError, Result};
use crate::store::{AuditRecord, BusStore, NewAuditEntry};

/// Appends audit rows and answers duplicate lookups.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn BusStore>,
    fallback_dir: Option<PathBuf>,
}

impl AuditLog {
    /// Create an audit log over a system store, without a fallback sink.
    pub fn new(store: Arc<dyn BusStore>) -> Self {
        AuditLog {
            store,
            fallback_dir: None,
        }
    }

    /// Mirror failed appends to files under a directory.
    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = Some(dir.into());
        self
    }

    /// Append one entry. Failures are swallowed.
    pub async fn append(&self, entry: &NewAuditEntry) {
        if let Err(err) = self.store.append_audit(entry).await {
            error!(
                account_id = %entry.account_id,
                document_type = %entry.document_type,
                error = %err,
                "audit append failed"
            );
            self.write_fallback(entry, &err);
        }
    }

    /// Earlier successful write for the same source id, if any.
    pub async fn find_successful(
        &self,
        account_id: &str,
        document_type: &str,
        source_id: &str,
    ) -> Result<Option<AuditRecord>> {
        self.store
            .find_successful_audit(account_id, document_type, source_id)
            .await
    }

    fn write_fallback(&self, entry: &NewAuditEntry, err: &BusError) {
        let Some(dir) = &self.fallback_dir else {
            return;
        };
        let name = format!(
            "{}_{}_Error_{}.txt",
            entry.account_id,
            entry.document_type,
            Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let body = format!(
            "audit append failed: {err}\nok: {}\nresult: {}\nsource_id: {}\npayload: {}\n",
            entry.ok, entry.result, entry.source_id, entry.payload
        );
        let _ = std::fs::create_dir_all(dir);
        if let Err(io) = std::fs::write(dir.join(name), body) {
            error!(error = %io, "audit fallback file write failed");
        }
    }
}
