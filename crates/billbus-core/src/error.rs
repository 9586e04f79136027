// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for billbus core operations

use thiserror::Error;

use crate::registry::ConfigStoreError;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during dispatch, write, relay and task operations
#[derive(Error, Debug)]
pub enum BusError {
    /// No configuration exists for the requested account / document type pair
    #[error("unknown account or document type: {account_id}/{document_type}")]
    ConfigNotFound {
        /// Account the caller addressed (resolved default if omitted)
        account_id: String,
        /// Document type the caller addressed
        document_type: String,
    },

    /// Missing, unknown or expired token on a guarded document type
    #[error("invalid or expired token")]
    InvalidToken,

    /// A successful write already exists for the caller's source id
    #[error("document already submitted, prior result: {prior}")]
    DuplicateEntry {
        /// Result description recorded by the earlier successful write
        prior: String,
    },

    /// A write transaction failed and was rolled back
    #[error("write transaction failed: {0}")]
    TransactionFailure(String),

    /// The forwarding target could not be reached or replied unparseably
    #[error("remote call failed: {0}")]
    RemoteCallFailed(String),

    /// The forwarding target replied with a failure envelope
    #[error("remote peer rejected the document: {0}")]
    RemoteRejected(String),

    /// The forwarding handler found no local record to relay
    #[error("no source record matched the request")]
    NoSourceRecord,

    /// The document type names a handler variant that is not registered
    #[error("unknown handler variant '{0}'")]
    UnknownHandler(String),

    /// A required SQL template role is missing or malformed
    #[error("template error: {0}")]
    Template(String),

    /// Configuration store failure other than a plain lookup miss
    #[error("configuration error: {0}")]
    Config(ConfigStoreError),

    /// Database error from an account gateway or the system store
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure on the system store
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BusError {
    /// Short code for the envelope `Code` field. `"0"` is reserved for success.
    pub fn error_code(&self) -> &'static str {
        match self {
            BusError::ConfigNotFound { .. } => "10",
            BusError::InvalidToken => "11",
            BusError::DuplicateEntry { .. } => "12",
            BusError::UnknownHandler(_) => "13",
            BusError::TransactionFailure(_) => "20",
            BusError::NoSourceRecord => "21",
            BusError::RemoteCallFailed(_) => "30",
            BusError::RemoteRejected(_) => "31",
            BusError::Template(_) => "40",
            BusError::Config(_) => "41",
            BusError::Database(_) | BusError::Migrate(_) => "50",
            BusError::Json(_) => "51",
        }
    }
}

impl From<ConfigStoreError> for BusError {
    fn from(err: ConfigStoreError) -> Self {
        match err {
            ConfigStoreError::AccountNotFound(account_id) => BusError::ConfigNotFound {
                account_id,
                document_type: String::new(),
            },
            ConfigStoreError::DocumentTypeNotFound {
                account_id,
                document_type,
            } => BusError::ConfigNotFound {
                account_id,
                document_type,
            },
            other => BusError::Config(other),
        }
    }
}
