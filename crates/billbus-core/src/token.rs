// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Token guard
//!
//! Tokens are opaque UUIDs with a sliding 10-minute idle window. There is
//! no background sweeper: every check first purges tokens whose window
//! has lapsed, then tests for the presented one. A successful check is
//! followed by exactly one refresh, sliding the window forward.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::store::BusStore;

/// Idle minutes after which a token lapses
pub const TOKEN_IDLE_MINUTES: i64 = 10;

/// Issues and validates access tokens against the system store.
#[derive(Clone)]
pub struct TokenGuard {
    store: Arc<dyn BusStore>,
}

impl TokenGuard {
    /// Create a guard over a system store.
    pub fn new(store: Arc<dyn BusStore>) -> Self {
        TokenGuard { store }
    }

    /// Issue a fresh token for a caller identity.
    pub async fn issue(&self, user_id: &str) -> Result<String> {
        let token_id = Uuid::new_v4().to_string();
        self.store.insert_token(&token_id, user_id).await?;
        debug!(user_id, "token issued");
        Ok(token_id)
    }

    /// Purge lapsed tokens, then test whether the presented one survives.
    pub async fn check(&self, token_id: &str) -> Result<bool> {
        let cutoff = Utc::now() - Duration::minutes(TOKEN_IDLE_MINUTES);
        let purged = self.store.purge_idle_tokens(cutoff).await?;
        if purged > 0 {
            debug!(purged, "purged idle tokens");
        }
        self.store.token_exists(token_id).await
    }

    /// Slide a token's idle window forward after a successful check.
    pub async fn refresh(&self, token_id: &str) -> Result<()> {
        self.store.touch_token(token_id, Utc::now()).await
    }
}
