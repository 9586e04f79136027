// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Business metadata: accounts, document types and task definitions
//!
//! All behavior in the bus is configuration-driven. The [`ConfigStore`]
//! trait yields immutable snapshots of that configuration; the file-backed
//! implementation reads a JSON directory:
//!
//! ```text
//! <config dir>/accounts.json                account registry + default account
//! <config dir>/tasks.json                   change-detection task definitions
//! <config dir>/types/<account>/<type>.json  one document-type config each
//! ```
//!
//! Snapshots are re-read per access, so edits on disk take effect on the
//! next request without a handle to shared mutable state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration lookup and parse errors
#[derive(Error, Debug)]
pub enum ConfigStoreError {
    /// The account id is not present in the registry
    #[error("account '{0}' is not configured")]
    AccountNotFound(String),

    /// No document-type config exists for the account / type pair
    #[error("document type '{document_type}' is not configured for account '{account_id}'")]
    DocumentTypeNotFound {
        /// Account addressed by the request
        account_id: String,
        /// Document type addressed by the request
        document_type: String,
    },

    /// Request omitted the account and no default account is configured
    #[error("no account given and no default account configured")]
    NoDefaultAccount,

    /// A configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to read
        path: String,
        /// Underlying io error
        source: std::io::Error,
    },

    /// A configuration file could not be parsed
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that failed to parse
        path: String,
        /// Underlying serde error
        source: serde_json::Error,
    },
}

/// Database engine of an account database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// SQLite file or in-memory database
    Sqlite,
    /// PostgreSQL server
    Postgres,
}

/// Connection settings for one account database
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Engine the account database runs on
    pub engine: DatabaseEngine,
    /// Connection URL for the account database
    pub url: String,
}

/// SQL templates of a document type, keyed by role
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqlTemplates {
    /// Read query with a `{where}` placeholder for the caller filter
    #[serde(default)]
    pub find: Option<String>,
    /// Secondary read producing line-item rows for the forwarding payload
    #[serde(default)]
    pub find_body: Option<String>,
    /// Head insert; must return one row with `iId`, `cCode` and `iIds`
    #[serde(default)]
    pub save_head: Option<String>,
    /// Per-line-item insert, executed once per body row
    #[serde(default)]
    pub save_body: Option<String>,
    /// Optional post-processing statement, receives `@iId`
    #[serde(default)]
    pub after_save: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Relay target of a forwarding document type
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Remote endpoint URL
    pub url: String,
    /// HTTP method, defaults to POST
    #[serde(default = "default_method")]
    pub method: String,
    /// Account id the payload addresses on the remote side
    pub to_account: String,
    /// Document type the payload addresses on the remote side
    pub to_document_type: String,
}

/// Full configuration of one document type under one account
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTypeConfig {
    /// Handler variant name, resolved through the handler registry
    pub handler: String,
    /// Whether operations on this type require a valid token
    #[serde(default)]
    pub require_token: bool,
    /// Whether the raw request payload is persisted in the audit log
    #[serde(default)]
    pub log_payload: bool,
    /// Operator recorded on writes that carry no maker field
    #[serde(default)]
    pub default_maker: String,
    /// SQL templates by role
    #[serde(default)]
    pub sql: SqlTemplates,
    /// Relay target, required by the forwarding handler
    #[serde(default)]
    pub forward: Option<ForwardConfig>,
}

fn default_true() -> bool {
    true
}

/// One change-detection task definition
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    /// Disabled definitions are skipped entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Account database the extraction query runs against
    pub account_id: String,
    /// Document type enqueued tasks are dispatched as
    pub document_type: String,
    /// Extraction query with a `{watermark}` placeholder
    #[serde(default)]
    pub extract_sql: String,
    /// Column of the extraction result the watermark advances on
    #[serde(default)]
    pub watermark_column: String,
    /// Registered custom handler name; bypasses default detection when set
    #[serde(default)]
    pub custom_handler: Option<String>,
}

/// Read access to the business metadata registry.
pub trait ConfigStore: Send + Sync {
    /// Resolve the effective account id for a request, applying the
    /// configured default when the caller omitted one.
    fn resolve_account(&self, requested: Option<&str>) -> Result<String, ConfigStoreError>;

    /// Connection settings for an account.
    fn account(&self, account_id: &str) -> Result<AccountConfig, ConfigStoreError>;

    /// Document-type configuration under an account.
    fn document_type(
        &self,
        account_id: &str,
        document_type: &str,
    ) -> Result<DocumentTypeConfig, ConfigStoreError>;

    /// All task definitions, enabled or not.
    fn task_definitions(&self) -> Result<Vec<TaskDefinition>, ConfigStoreError>;
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    default_account: Option<String>,
    accounts: HashMap<String, AccountConfig>,
}

/// [`ConfigStore`] backed by a JSON configuration directory.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    root: PathBuf,
}

impl FileConfigStore {
    /// Create a store rooted at a configuration directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileConfigStore { root: root.into() }
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigStoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigStoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigStoreError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn accounts(&self) -> Result<AccountsFile, ConfigStoreError> {
        Self::read_json(&self.root.join("accounts.json"))
    }

    // Account and type ids come from the wire and end up in file paths.
    fn safe_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl ConfigStore for FileConfigStore {
    fn resolve_account(&self, requested: Option<&str>) -> Result<String, ConfigStoreError> {
        match requested.filter(|s| !s.trim().is_empty()) {
            Some(account_id) => Ok(account_id.trim().to_string()),
            None => self
                .accounts()?
                .default_account
                .filter(|s| !s.is_empty())
                .ok_or(ConfigStoreError::NoDefaultAccount),
        }
    }

    fn account(&self, account_id: &str) -> Result<AccountConfig, ConfigStoreError> {
        self.accounts()?
            .accounts
            .remove(account_id)
            .ok_or_else(|| ConfigStoreError::AccountNotFound(account_id.to_string()))
    }

    fn document_type(
        &self,
        account_id: &str,
        document_type: &str,
    ) -> Result<DocumentTypeConfig, ConfigStoreError> {
        let miss = || ConfigStoreError::DocumentTypeNotFound {
            account_id: account_id.to_string(),
            document_type: document_type.to_string(),
        };
        if !Self::safe_name(account_id) || !Self::safe_name(document_type) {
            return Err(miss());
        }
        // Account must exist before its type directory is consulted.
        self.account(account_id)?;
        let path = self
            .root
            .join("types")
            .join(account_id)
            .join(format!("{document_type}.json"));
        if !path.is_file() {
            return Err(miss());
        }
        Self::read_json(&path)
    }

    fn task_definitions(&self) -> Result<Vec<TaskDefinition>, ConfigStoreError> {
        let path = self.root.join("tasks.json");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        Self::read_json(&path)
    }
}
