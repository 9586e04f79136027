// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! billbus server - HTTP transport for the document integration bus
//!
//! Exposes the JSON and XML document surfaces over axum and hosts the
//! background task engine. All business behavior lives in billbus-core;
//! this crate only translates bodies and wires the process together.

#![deny(missing_docs)]

pub mod config;
pub mod routes;
pub mod xml;

use std::sync::Arc;

use axum::Router;
use axum::routing::post;
use billbus_core::Dispatcher;
use tower_http::trace::TraceLayer;

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    /// The operation entry point
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/json/get", post(routes::json_get))
        .route("/api/json/set", post(routes::json_set))
        .route("/api/json/token", post(routes::json_token))
        .route("/api/xml/get", post(routes::xml_get))
        .route("/api/xml/set", post(routes::xml_set))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
