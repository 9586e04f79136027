// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The transport-independent request shape
//!
//! Both the JSON and the XML surface flatten into a [`DocumentRequest`]:
//! an optional account, a document type, an optional token and filter,
//! and head/body field maps with every value carried as a string.

use serde_json::{Map, Value, json};

use crate::envelope::{FieldMap, field};

/// One inbound fetch or write request.
#[derive(Debug, Clone, Default)]
pub struct DocumentRequest {
    /// Account id, resolved to the configured default when absent
    pub account_id: Option<String>,
    /// Document type name
    pub document_type: String,
    /// Access token, required only by guarded document types
    pub token: Option<String>,
    /// Caller filter for fetch operations
    pub where_clause: Option<String>,
    /// Head fields
    pub head: FieldMap,
    /// Body rows (line items)
    pub body: Vec<FieldMap>,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn object_fields(value: Option<&Value>) -> FieldMap {
    let mut fields = FieldMap::new();
    if let Some(Value::Object(map)) = value {
        for (k, v) in map {
            fields.insert(k.clone(), value_text(v));
        }
    }
    fields
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .map(value_text)
        .filter(|s| !s.trim().is_empty())
}

impl DocumentRequest {
    /// Flatten a JSON body of the `/api/json/*` surface.
    pub fn from_json(value: &Value) -> Self {
        let body = match value.get("body") {
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|row| object_fields(Some(row)))
                .collect(),
            _ => Vec::new(),
        };
        DocumentRequest {
            account_id: text(value.get("accno")),
            document_type: text(value.get("billtype")).unwrap_or_default(),
            token: text(value.get("token")),
            where_clause: text(value.get("where")),
            head: object_fields(value.get("head")),
            body,
        }
    }

    /// Render back to the JSON surface shape, used for payload logging.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        if let Some(accno) = &self.account_id {
            root.insert("accno".to_string(), json!(accno));
        }
        root.insert("billtype".to_string(), json!(self.document_type));
        if let Some(where_clause) = &self.where_clause {
            root.insert("where".to_string(), json!(where_clause));
        }
        root.insert("head".to_string(), json!(self.head));
        if !self.body.is_empty() {
            root.insert("body".to_string(), json!(self.body));
        }
        Value::Object(root)
    }

    /// The caller's source-system id, from `cSrcID` or `csrcsysid`.
    pub fn source_id(&self) -> String {
        field(&self.head, "cSrcID")
            .or_else(|| field(&self.head, "csrcsysid"))
            .cloned()
            .unwrap_or_default()
    }
}
