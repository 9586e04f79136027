// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! billbus core - metadata-driven document integration bus
//!
//! The core moves business documents ("bills") between external callers
//! and per-account relational databases without compiled-in knowledge of
//! any document type. Everything is configuration:
//!
//! - [`registry`] loads accounts, document types (SQL templates, flags,
//!   forward targets) and task definitions from a JSON directory.
//! - [`dispatch`] resolves a request to its handler variant and runs the
//!   hard gates: token, duplicate, audit.
//! - [`handlers`] carries the built-in variants: the generic
//!   template-driven read/write pipeline and the forwarding relay.
//! - [`engine`] is the background loop that detects changed source rows
//!   by watermark and pushes them through the same write pipeline with
//!   retry accounting.
//! - [`gateway`] and [`store`] are the two persistence seams: account
//!   business databases and the bus's own system database (tokens,
//!   audit log, task queue, watermarks), each on sqlite or postgres.
//!
//! Every operation, success or failure, folds into the generic
//! [`envelope::Envelope`] so transports never propagate raw faults.

#![deny(missing_docs)]

pub mod audit;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod migrations;
pub mod registry;
pub mod request;
pub mod store;
pub mod template;
pub mod token;

pub use dispatch::Dispatcher;
pub use engine::{EngineConfig, TaskEngine};
pub use envelope::Envelope;
pub use error::{BusError, Result};
pub use request::DocumentRequest;
