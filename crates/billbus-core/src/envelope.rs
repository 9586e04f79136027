// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic result envelope returned by every operation
//!
//! Every fetch, write or relay call produces an [`Envelope`], success and
//! failure alike. The transport layer serializes it verbatim (JSON) or
//! renders it element-by-element (XML). Field names on the wire use the
//! PascalCase casing callers expect; lowercase aliases are accepted when a
//! remote peer replies through its own JSON surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// A flat row of column name to string value.
///
/// Account databases are metadata-driven, so rows have no compile-time
/// shape; every column is carried as its string rendering.
pub type FieldMap = BTreeMap<String, String>;

/// Case-insensitive field lookup in a [`FieldMap`].
///
/// Callers and SQL templates disagree on casing often enough (`cSrcID` vs
/// `csrcsysid`) that exact lookup would be a trap.
pub fn field<'a>(row: &'a FieldMap, name: &str) -> Option<&'a String> {
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn default_result() -> String {
    "NG".to_string()
}

fn default_code() -> String {
    "1".to_string()
}

/// The generic operation result returned to every caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// `"OK"` on success, `"NG"` otherwise
    #[serde(rename = "Result", alias = "result", default = "default_result")]
    pub result: String,
    /// `"0"` on success, a non-zero error code otherwise
    #[serde(rename = "Code", alias = "code", default = "default_code")]
    pub code: String,
    /// Human-readable description of the outcome
    #[serde(rename = "Desc", alias = "desc", default)]
    pub desc: String,
    /// Result rows for fetch operations
    #[serde(rename = "Data", alias = "data", default)]
    pub data: Vec<FieldMap>,
    /// Identity of a newly created document head
    #[serde(rename = "NewBillId", alias = "newbillid", default)]
    pub new_bill_id: String,
    /// Generated code of a newly created document head
    #[serde(rename = "NewBillCode", alias = "newbillcode", default)]
    pub new_bill_code: String,
    /// Caller's own source-system id, echoed back for correlation
    #[serde(rename = "CSrcSysId", alias = "csrcsysid", default)]
    pub c_src_sys_id: String,
    /// Server time the envelope was produced
    #[serde(rename = "Time", alias = "time", default = "Utc::now")]
    pub time: DateTime<Utc>,
    /// Issued token, populated by the token endpoint only
    #[serde(rename = "Token", alias = "token", default)]
    pub token: String,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope::ok()
    }
}

impl Envelope {
    /// Empty success envelope.
    pub fn ok() -> Self {
        Envelope {
            result: "OK".to_string(),
            code: "0".to_string(),
            desc: String::new(),
            data: Vec::new(),
            new_bill_id: String::new(),
            new_bill_code: String::new(),
            c_src_sys_id: String::new(),
            time: Utc::now(),
            token: String::new(),
        }
    }

    /// Success envelope carrying fetched rows.
    pub fn with_data(data: Vec<FieldMap>) -> Self {
        Envelope {
            data,
            ..Envelope::ok()
        }
    }

    /// Failure envelope for an explicit code and description.
    pub fn error(code: &str, desc: &str) -> Self {
        Envelope {
            result: "NG".to_string(),
            code: code.to_string(),
            desc: desc.to_string(),
            ..Envelope::ok()
        }
    }

    /// Failure envelope for a [`BusError`].
    pub fn failure(err: &BusError) -> Self {
        Envelope::error(err.error_code(), &err.to_string())
    }

    /// Whether the envelope reports success.
    pub fn is_ok(&self) -> bool {
        self.result == "OK"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_casing() {
        let env = Envelope::ok();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["Result"], "OK");
        assert_eq!(json["Code"], "0");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn parses_lowercase_remote_reply() {
        let env: Envelope = serde_json::from_str(
            r#"{"result":"OK","code":"0","desc":"saved","newbillid":"17","newbillcode":"SO-17"}"#,
        )
        .unwrap();
        assert!(env.is_ok());
        assert_eq!(env.new_bill_id, "17");
        assert_eq!(env.new_bill_code, "SO-17");
    }

    #[test]
    fn missing_result_defaults_to_failure() {
        let env: Envelope = serde_json::from_str(r#"{"desc":"boom"}"#).unwrap();
        assert!(!env.is_ok());
        assert_eq!(env.code, "1");
    }

    #[test]
    fn failure_carries_error_code() {
        let env = Envelope::failure(&BusError::InvalidToken);
        assert_eq!(env.result, "NG");
        assert_eq!(env.code, "11");
        assert!(env.desc.contains("token"));
    }

    #[test]
    fn field_lookup_ignores_case() {
        let mut row = FieldMap::new();
        row.insert("cSrcID".to_string(), "A-1".to_string());
        assert_eq!(field(&row, "csrcid").map(String::as_str), Some("A-1"));
        assert_eq!(field(&row, "missing"), None);
    }
}
