// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQL template rendering
//!
//! Document-type SQL lives in configuration and names its parameters
//! `@name`. Before execution a template is rendered for the target driver:
//! every `@name` becomes a positional placeholder (`?` for sqlite, `$n` for
//! postgres) and the matching value is collected into an ordered bind list.
//! Caller values therefore never enter the SQL text; only the two skeleton
//! placeholders `{where}` and `{watermark}` are spliced as text, and those
//! are fed from configuration-controlled sources.

use std::collections::BTreeMap;

use crate::envelope::FieldMap;

/// Positional placeholder syntax of the target driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?` placeholders (sqlite)
    Question,
    /// `$1`, `$2`, ... placeholders (postgres)
    Numbered,
}

/// Named parameter set for one template rendering.
///
/// Lookup is case-insensitive; a `None` value binds as SQL NULL, and so
/// does a name the template references but the set does not contain.
#[derive(Debug, Clone, Default)]
pub struct SqlParams {
    values: BTreeMap<String, Option<String>>,
}

impl SqlParams {
    /// Empty parameter set.
    pub fn new() -> Self {
        SqlParams::default()
    }

    /// Parameter set carrying every field of a row.
    pub fn from_fields(fields: &FieldMap) -> Self {
        let mut params = SqlParams::new();
        for (name, value) in fields {
            params.set(name, value.clone());
        }
        params
    }

    /// Set a parameter to a value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values
            .insert(name.to_ascii_lowercase(), Some(value.into()));
    }

    /// Set a parameter to a value or NULL.
    pub fn set_opt(&mut self, name: &str, value: Option<String>) {
        self.values.insert(name.to_ascii_lowercase(), value);
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Option<String>> {
        self.values.get(&name.to_ascii_lowercase())
    }
}

/// Render a template into driver SQL plus an ordered bind list.
pub fn render(template: &str, params: &SqlParams, style: ParamStyle) -> (String, Vec<Option<String>>) {
    let mut sql = String::with_capacity(template.len());
    let mut binds = Vec::new();
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '@' {
            sql.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, n)) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            // A lone '@' is not a parameter marker.
            sql.push('@');
            continue;
        }
        binds.push(params.get(&name).cloned().flatten());
        match style {
            ParamStyle::Question => sql.push('?'),
            ParamStyle::Numbered => {
                sql.push('$');
                sql.push_str(&binds.len().to_string());
            }
        }
    }
    (sql, binds)
}

/// Splice a skeleton placeholder such as `{where}` or `{watermark}`.
pub fn splice(template: &str, placeholder: &str, value: &str) -> String {
    template.replace(placeholder, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_question_placeholders() {
        let mut params = SqlParams::new();
        params.set("cCode", "SO-1");
        params.set("iRows", "3");
        let (sql, binds) = render(
            "Insert Into bills (cCode, iRows) Values (@cCode, @iRows)",
            &params,
            ParamStyle::Question,
        );
        assert_eq!(sql, "Insert Into bills (cCode, iRows) Values (?, ?)");
        assert_eq!(
            binds,
            vec![Some("SO-1".to_string()), Some("3".to_string())]
        );
    }

    #[test]
    fn renders_numbered_placeholders() {
        let mut params = SqlParams::new();
        params.set("iId", "7");
        let (sql, binds) = render(
            "Update bills Set cCloser = @iId Where iId = @iId",
            &params,
            ParamStyle::Numbered,
        );
        assert_eq!(sql, "Update bills Set cCloser = $1 Where iId = $2");
        assert_eq!(binds.len(), 2);
        assert_eq!(binds[0], Some("7".to_string()));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut params = SqlParams::new();
        params.set("csrcid", "A-1");
        let (_, binds) = render("Select @cSrcID", &params, ParamStyle::Question);
        assert_eq!(binds, vec![Some("A-1".to_string())]);
    }

    #[test]
    fn missing_and_null_params_bind_null() {
        let mut params = SqlParams::new();
        params.set_opt("qty", None);
        let (sql, binds) = render(
            "Values (@qty, @absent)",
            &params,
            ParamStyle::Question,
        );
        assert_eq!(sql, "Values (?, ?)");
        assert_eq!(binds, vec![None, None]);
    }

    #[test]
    fn lone_at_is_preserved() {
        let (sql, binds) = render("Select '@' ", &SqlParams::new(), ParamStyle::Question);
        assert_eq!(sql, "Select '@' ");
        assert!(binds.is_empty());
    }

    #[test]
    fn splices_where_skeleton() {
        let sql = splice(
            "Select * From bills Where 1=1 {where}",
            "{where}",
            "And cCode = 'X'",
        );
        assert_eq!(sql, "Select * From bills Where 1=1 And cCode = 'X'");
        let bare = splice("Select * From bills Where 1=1 {where}", "{where}", "");
        assert_eq!(bare, "Select * From bills Where 1=1 ");
    }
}
