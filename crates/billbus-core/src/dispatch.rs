// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch: handler registry and the operation gates
//!
//! The [`Dispatcher`] is the single entry point for fetch and write
//! operations. It resolves the (account, document type) pair to its
//! configuration, walks the hard gates in order (token, duplicate),
//! invokes the configured handler and always folds the outcome into an
//! [`Envelope`] so no caller ever sees a raw fault.
//!
//! Handler variants are an explicit registry keyed by name; a document
//! type naming an unregistered variant fails at resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::envelope::{Envelope, FieldMap, field};
use crate::error::{BusError, Result};
use crate::gateway::{AccountDatabase, GatewayFactory};
use crate::handlers::{ForwardHandler, GenericHandler};
use crate::registry::{ConfigStore, DocumentTypeConfig};
use crate::request::DocumentRequest;
use crate::store::{BusStore, NewAuditEntry};
use crate::token::TokenGuard;

/// Everything a handler may touch while serving one operation.
pub struct HandlerContext<'a> {
    /// Resolved account id
    pub account_id: &'a str,
    /// Requested document type
    pub document_type: &'a str,
    /// Document-type configuration
    pub config: &'a DocumentTypeConfig,
    /// Gateway to the account database
    pub db: Arc<dyn AccountDatabase>,
    /// Shared outbound HTTP client
    pub http: &'a reqwest::Client,
    /// Directory for relay traces and similar artifacts, if configured
    pub log_dir: Option<&'a Path>,
}

/// Result of a successful write.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    /// Identity of the created document head
    pub new_id: String,
    /// Generated code of the created document head
    pub new_code: String,
    /// Description for the envelope `Desc` field
    pub desc: String,
}

/// One handler variant: the fetch and write semantics of a document type.
#[async_trait]
pub trait DocumentHandler: Send + Sync {
    /// Serve a fetch operation.
    async fn fetch(
        &self,
        ctx: &HandlerContext<'_>,
        request: &DocumentRequest,
    ) -> Result<Vec<FieldMap>>;

    /// Serve a write operation.
    async fn write(
        &self,
        ctx: &HandlerContext<'_>,
        request: &DocumentRequest,
    ) -> Result<WriteOutcome>;
}

/// Named registry of handler variants.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DocumentHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in variants `generic` and
    /// `forward`.
    pub fn with_defaults() -> Self {
        let mut registry = HandlerRegistry::new();
        registry.register("generic", Arc::new(GenericHandler));
        registry.register("forward", Arc::new(ForwardHandler));
        registry
    }

    /// Register a variant under a name, replacing any previous one.
    pub fn register(&mut self, name: &str, handler: Arc<dyn DocumentHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Look up a variant.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DocumentHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistry::with_defaults()
    }
}

/// Orchestrates resolution, gates, handler invocation and auditing.
pub struct Dispatcher {
    config: Arc<dyn ConfigStore>,
    gateways: Arc<GatewayFactory>,
    registry: HandlerRegistry,
    tokens: TokenGuard,
    audit: AuditLog,
    http: reqwest::Client,
    log_dir: Option<PathBuf>,
}

impl Dispatcher {
    /// Create a dispatcher with the default handler registry.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        gateways: Arc<GatewayFactory>,
        store: Arc<dyn BusStore>,
    ) -> Self {
        Dispatcher {
            config,
            gateways,
            registry: HandlerRegistry::with_defaults(),
            tokens: TokenGuard::new(store.clone()),
            audit: AuditLog::new(store),
            http: reqwest::Client::new(),
            log_dir: None,
        }
    }

    /// Use a log directory for relay traces and the audit fallback sink.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.audit = self.audit.clone().with_fallback_dir(&dir);
        self.log_dir = Some(dir);
        self
    }

    /// Replace the handler registry, e.g. to add custom variants.
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The token guard, exposed for the issuance endpoint.
    pub fn tokens(&self) -> &TokenGuard {
        &self.tokens
    }

    /// Serve a fetch operation, always returning an envelope.
    pub async fn fetch(&self, request: &DocumentRequest) -> Envelope {
        match self.try_fetch(request).await {
            Ok(data) => {
                info!(
                    document_type = %request.document_type,
                    rows = data.len(),
                    "fetch served"
                );
                Envelope::with_data(data)
            }
            Err(err) => {
                warn!(document_type = %request.document_type, error = %err, "fetch failed");
                Envelope::failure(&err)
            }
        }
    }

    /// Serve a write operation, always returning an envelope with the
    /// caller's source id echoed back.
    pub async fn write(&self, request: &DocumentRequest) -> Envelope {
        let mut envelope = match self.try_write(request).await {
            Ok(outcome) => {
                info!(
                    document_type = %request.document_type,
                    new_id = %outcome.new_id,
                    new_code = %outcome.new_code,
                    "write served"
                );
                Envelope {
                    new_bill_id: outcome.new_id,
                    new_bill_code: outcome.new_code,
                    desc: outcome.desc,
                    ..Envelope::ok()
                }
            }
            Err(err) => {
                warn!(document_type = %request.document_type, error = %err, "write failed");
                Envelope::failure(&err)
            }
        };
        envelope.c_src_sys_id = request.source_id();
        envelope
    }

    async fn try_fetch(&self, request: &DocumentRequest) -> Result<Vec<FieldMap>> {
        let (account_id, config) = self.resolve(request)?;
        if config.require_token {
            self.gate_token(request).await?;
        }
        let handler = self.handler(&config)?;
        let db = self.gateways.account_db(&account_id).await?;
        let ctx = self.context(&account_id, &request.document_type, &config, db);
        handler.fetch(&ctx, request).await
    }

    async fn try_write(&self, request: &DocumentRequest) -> Result<WriteOutcome> {
        let (account_id, config) = self.resolve(request)?;
        if config.require_token {
            self.gate_token(request).await?;
        }

        let source_id = request.source_id();
        if !source_id.is_empty()
            && let Some(prior) = self
                .audit
                .find_successful(&account_id, &request.document_type, &source_id)
                .await?
        {
            return Err(BusError::DuplicateEntry {
                prior: prior.result,
            });
        }

        let handler = self.handler(&config)?;
        let db = self.gateways.account_db(&account_id).await?;
        let ctx = self.context(&account_id, &request.document_type, &config, db);
        let outcome = handler.write(&ctx, request).await;

        let mut entry = NewAuditEntry {
            account_id: account_id.clone(),
            document_type: request.document_type.clone(),
            operator: field(&request.head, "cMaker")
                .cloned()
                .unwrap_or_else(|| config.default_maker.clone()),
            op_kind: "write".to_string(),
            source_id,
            ..NewAuditEntry::default()
        };
        if config.log_payload {
            entry.payload = request.to_json().to_string();
        }
        match &outcome {
            Ok(done) => {
                entry.ok = true;
                entry.result = if done.desc.is_empty() {
                    "OK".to_string()
                } else {
                    done.desc.clone()
                };
                entry.new_id = done.new_id.clone();
                entry.new_code = done.new_code.clone();
            }
            Err(err) => {
                entry.result = err.to_string();
            }
        }
        self.audit.append(&entry).await;

        outcome
    }

    fn resolve(&self, request: &DocumentRequest) -> Result<(String, DocumentTypeConfig)> {
        let account_id = self.config.resolve_account(request.account_id.as_deref())?;
        let config = self
            .config
            .document_type(&account_id, &request.document_type)?;
        Ok((account_id, config))
    }

    async fn gate_token(&self, request: &DocumentRequest) -> Result<()> {
        let token = request.token.as_deref().unwrap_or("");
        if token.is_empty() || !self.tokens.check(token).await? {
            return Err(BusError::InvalidToken);
        }
        self.tokens.refresh(token).await?;
        Ok(())
    }

    fn handler(&self, config: &DocumentTypeConfig) -> Result<Arc<dyn DocumentHandler>> {
        self.registry
            .get(&config.handler)
            .ok_or_else(|| BusError::UnknownHandler(config.handler.clone()))
    }

    fn context<'a>(
        &'a self,
        account_id: &'a str,
        document_type: &'a str,
        config: &'a DocumentTypeConfig,
        db: Arc<dyn AccountDatabase>,
    ) -> HandlerContext<'a> {
        HandlerContext {
            account_id,
            document_type,
            config,
            db,
            http: &self.http,
            log_dir: self.log_dir.as_deref(),
        }
    }
}
