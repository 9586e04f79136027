// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes
//!
//! Every route answers 200 with an envelope body; faults fold into the
//! envelope rather than an HTTP error status.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use billbus_core::{DocumentRequest, Envelope};
use serde_json::Value;
use tracing::warn;

use crate::AppState;
use crate::xml;

/// `POST /api/json/get`: fetch documents.
pub async fn json_get(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Envelope> {
    let request = DocumentRequest::from_json(&body);
    Json(state.dispatcher.fetch(&request).await)
}

/// `POST /api/json/set`: submit a document.
pub async fn json_set(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Envelope> {
    let request = DocumentRequest::from_json(&body);
    Json(state.dispatcher.write(&request).await)
}

/// `POST /api/json/token`: issue an access token.
pub async fn json_token(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Envelope> {
    let user = body.get("user").and_then(Value::as_str).unwrap_or("").trim();
    if user.is_empty() {
        return Json(Envelope::error("1", "user is required"));
    }
    match state.dispatcher.tokens().issue(user).await {
        Ok(token) => {
            let mut envelope = Envelope::ok();
            envelope.token = token;
            Json(envelope)
        }
        Err(err) => Json(Envelope::failure(&err)),
    }
}

// Minimal hand-built document for when the regular renderer itself
// failed. The message still needs escaping to stay well-formed.
fn failure_doc(err: &xml::XmlError) -> String {
    format!(
        "<Doc><Result>NG</Result><Code>1</Code><Desc>{}</Desc></Doc>",
        quick_xml::escape::escape(err.to_string().as_str())
    )
}

fn xml_response(rendered: Result<String, xml::XmlError>) -> Response {
    let body = rendered.unwrap_or_else(|err| {
        warn!(error = %err, "XML render failed");
        failure_doc(&err)
    });
    (
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        body,
    )
        .into_response()
}

/// `POST /api/xml/get`: fetch documents, XML surface.
pub async fn xml_get(State(state): State<AppState>, body: String) -> Response {
    let rendered = match xml::parse_request(&body) {
        Ok(request) => xml::render_data(&state.dispatcher.fetch(&request).await),
        Err(err) => xml::render_envelope(&Envelope::error("1", &err.to_string())),
    };
    xml_response(rendered)
}

/// `POST /api/xml/set`: submit a document, XML surface.
pub async fn xml_set(State(state): State<AppState>, body: String) -> Response {
    let rendered = match xml::parse_request(&body) {
        Ok(request) => xml::render_envelope(&state.dispatcher.write(&request).await),
        Err(err) => xml::render_envelope(&Envelope::error("1", &err.to_string())),
    };
    xml_response(rendered)
}
