// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task engine: change detection and queued dispatch
//!
//! A single engine instance runs a fixed-interval loop. Each pass walks
//! the enabled task definitions: custom definitions are handed to their
//! registered [`TaskHandler`]; default definitions run watermark-based
//! change detection against the account database and enqueue one task per
//! changed row. The pass then dispatches one bounded batch of pending
//! tasks through the generic write pipeline and writes the attempt back.
//!
//! At most one pass runs at a time. When a pass outlives the interval the
//! overlapping tick is skipped, never queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::envelope::{FieldMap, field};
use crate::error::Result;
use crate::gateway::GatewayFactory;
use crate::registry::{ConfigStore, TaskDefinition};
use crate::request::DocumentRequest;
use crate::store::{BusStore, NewTask, TaskRecord};
use crate::template::{self, SqlParams};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between passes
    pub poll_interval: Duration,
    /// Maximum tasks dispatched per pass
    pub batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval: Duration::from_secs(60),
            batch_size: 10_000,
        }
    }
}

/// Custom per-definition processing, bypassing default detection.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process one enabled definition.
    async fn handle(&self, definition: &TaskDefinition) -> Result<()>;
}

/// The background change-detection and dispatch loop.
pub struct TaskEngine {
    config_store: Arc<dyn ConfigStore>,
    gateways: Arc<GatewayFactory>,
    store: Arc<dyn BusStore>,
    dispatcher: Arc<Dispatcher>,
    custom: HashMap<String, Arc<dyn TaskHandler>>,
    config: EngineConfig,
    shutdown: Arc<Notify>,
    pass_running: AtomicBool,
}

impl TaskEngine {
    /// Create an engine. It does nothing until [`TaskEngine::run`].
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        gateways: Arc<GatewayFactory>,
        store: Arc<dyn BusStore>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
    ) -> Self {
        TaskEngine {
            config_store,
            gateways,
            store,
            dispatcher,
            custom: HashMap::new(),
            config,
            shutdown: Arc::new(Notify::new()),
            pass_running: AtomicBool::new(false),
        }
    }

    /// Register a custom task handler under a name referenced by task
    /// definitions.
    pub fn register_custom_handler(&mut self, name: &str, handler: Arc<dyn TaskHandler>) {
        self.custom.insert(name.to_string(), handler);
    }

    /// Handle to request shutdown; the loop observes it at the next tick
    /// boundary.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the loop until shutdown is requested. The timer fires at a
    /// fixed rate; each tick spawns a pass, and the guard in
    /// [`TaskEngine::run_pass`] skips the pass when the previous one is
    /// still in flight.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "task engine started"
        );
        let engine = Arc::new(self);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + engine.config.poll_interval,
            engine.config.poll_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = engine.shutdown.notified() => {
                    info!("task engine shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move { engine.tick().await });
                }
            }
        }
    }

    async fn tick(&self) {
        if let Err(err) = self.run_pass().await {
            error!(error = %err, "engine pass failed");
        }
    }

    /// Run one full pass: detection for every enabled definition, then
    /// one dispatch batch. Returns `false` without doing any work when
    /// another pass is still in flight.
    pub async fn run_pass(&self) -> Result<bool> {
        if self
            .pass_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous pass still running, skipped");
            return Ok(false);
        }
        let outcome = self.pass().await;
        self.pass_running.store(false, Ordering::SeqCst);
        outcome?;
        Ok(true)
    }

    async fn pass(&self) -> Result<()> {
        let definitions = self.config_store.task_definitions()?;
        for definition in definitions.iter().filter(|d| d.enabled) {
            if let Some(name) = &definition.custom_handler {
                match self.custom.get(name) {
                    Some(handler) => {
                        let handler = handler.clone();
                        let definition = definition.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handler.handle(&definition).await {
                                error!(
                                    handler = %definition.custom_handler.as_deref().unwrap_or(""),
                                    error = %err,
                                    "custom task handler failed"
                                );
                            }
                        });
                    }
                    None => {
                        warn!(handler = %name, "task definition names an unregistered handler");
                    }
                }
                continue;
            }
            // One definition failing must not starve the others.
            if let Err(err) = self.detect(definition).await {
                error!(
                    account_id = %definition.account_id,
                    document_type = %definition.document_type,
                    error = %err,
                    "change detection failed"
                );
            }
        }
        self.dispatch_pending().await
    }

    async fn detect(&self, definition: &TaskDefinition) -> Result<()> {
        let watermark = self
            .store
            .watermark(&definition.account_id, &definition.document_type)
            .await?;
        let sql = template::splice(&definition.extract_sql, "{watermark}", &watermark);
        let db = self.gateways.account_db(&definition.account_id).await?;
        let rows = db.fetch_rows(&sql, &SqlParams::new()).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut enqueued = 0usize;
        for row in &rows {
            if self.store.enqueue_task(&row_task(definition, row)).await? {
                enqueued += 1;
            }
        }

        if let Some(max) = max_column_value(&rows, &definition.watermark_column) {
            self.store
                .set_watermark(&definition.account_id, &definition.document_type, &max)
                .await?;
        }
        info!(
            account_id = %definition.account_id,
            document_type = %definition.document_type,
            changed = rows.len(),
            enqueued,
            "change detection pass"
        );
        Ok(())
    }

    async fn dispatch_pending(&self) -> Result<()> {
        let tasks = self.store.pending_tasks(self.config.batch_size).await?;
        if tasks.is_empty() {
            return Ok(());
        }
        info!(count = tasks.len(), "dispatching pending tasks");
        for task in &tasks {
            let request = task_request(task);
            let envelope = self.dispatcher.write(&request).await;
            let ok = envelope.is_ok();
            if let Err(err) = self
                .store
                .record_task_attempt(&task.task_id, ok, &envelope.desc, Utc::now())
                .await
            {
                error!(task_id = %task.task_id, error = %err, "task attempt write-back failed");
            }
            if !ok {
                warn!(
                    task_id = %task.task_id,
                    attempt = task.attempt_count + 1,
                    desc = %envelope.desc,
                    "task dispatch failed"
                );
            }
        }
        Ok(())
    }
}

fn pick(row: &FieldMap, name: &str) -> String {
    field(row, name).cloned().unwrap_or_default()
}

fn row_task(definition: &TaskDefinition, row: &FieldMap) -> NewTask {
    NewTask {
        account_id: definition.account_id.clone(),
        document_type: definition.document_type.clone(),
        source_record_id: pick(row, "iId"),
        op_tag: pick(row, "cOpTag"),
        type_name: pick(row, "cBillTypeName"),
        bill_code: pick(row, "cBillCode"),
        define1: pick(row, "cDefine1"),
        define2: pick(row, "cDefine2"),
        define3: pick(row, "cDefine3"),
        define4: pick(row, "cDefine4"),
        define5: pick(row, "cDefine5"),
    }
}

// A queued task re-enters the pipeline as an ordinary write request with
// the task columns exposed as head fields.
fn task_request(task: &TaskRecord) -> DocumentRequest {
    let mut head = FieldMap::new();
    head.insert("GUID".to_string(), task.task_id.clone());
    head.insert("iId".to_string(), task.source_record_id.clone());
    head.insert("cOpTag".to_string(), task.op_tag.clone());
    head.insert("cBillTypeName".to_string(), task.type_name.clone());
    head.insert("cBillCode".to_string(), task.bill_code.clone());
    head.insert("cDefine1".to_string(), task.define1.clone());
    head.insert("cDefine2".to_string(), task.define2.clone());
    head.insert("cDefine3".to_string(), task.define3.clone());
    head.insert("cDefine4".to_string(), task.define4.clone());
    head.insert("cDefine5".to_string(), task.define5.clone());
    head.insert("cAccId".to_string(), task.account_id.clone());
    head.insert("cBillType".to_string(), task.document_type.clone());
    DocumentRequest {
        account_id: Some(task.account_id.clone()),
        document_type: task.document_type.clone(),
        head,
        ..DocumentRequest::default()
    }
}

/// Maximum value of a column across rows: integer comparison when every
/// value parses as an integer (ids can exceed what f64 holds exactly),
/// float comparison when every value parses as a number, lexicographic
/// otherwise.
fn max_column_value(rows: &[FieldMap], column: &str) -> Option<String> {
    let values: Vec<&String> = rows
        .iter()
        .filter_map(|row| field(row, column))
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return None;
    }
    let ints: Option<Vec<i128>> = values.iter().map(|v| v.parse::<i128>().ok()).collect();
    if let Some(numbers) = ints {
        let (idx, _) = numbers.iter().enumerate().max_by_key(|(_, n)| **n)?;
        return Some(values[idx].clone());
    }
    let floats: Option<Vec<f64>> = values.iter().map(|v| v.parse::<f64>().ok()).collect();
    let max = match floats {
        Some(numbers) => {
            let (idx, _) = numbers
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
            values[idx]
        }
        None => *values.iter().max()?,
    };
    Some(max.clone())
}
