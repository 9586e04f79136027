// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task engine: change detection, watermark, retry accounting

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use billbus_core::engine::{EngineConfig, TaskEngine, TaskHandler};
use billbus_core::error::Result;
use billbus_core::registry::TaskDefinition;
use billbus_core::store::{BusStore, NewTask};
use common::TestBus;

const TARGET_TYPE: &str = r#"{
    "handler": "generic",
    "sql": {
        "save_head": "INSERT INTO bills (cCode, cMaker, iRows, cSrcID) VALUES (@cBillCode, 'engine', @iRows, @GUID) RETURNING iId, cCode, 0 AS iIds"
    }
}"#;

const DETECT_TASKS: &str = r#"[{
    "account_id": "001",
    "document_type": "salesorder",
    "extract_sql": "SELECT iId, cOpTag, cBillCode, cBillTypeName, dModify FROM src_bills WHERE dModify > '{watermark}' ORDER BY iId",
    "watermark_column": "dModify"
}]"#;

async fn detection_bus() -> TestBus {
    let bus = TestBus::new().await;
    bus.create_bill_tables().await;
    bus.write_doc_type("salesorder", TARGET_TYPE);
    bus.write_tasks(DETECT_TASKS);
    sqlx::query(
        "CREATE TABLE src_bills (\
             iId INTEGER PRIMARY KEY, cOpTag TEXT, cBillCode TEXT, \
             cBillTypeName TEXT, dModify TEXT)",
    )
    .execute(&bus.account_pool)
    .await
    .unwrap();
    bus
}

async fn add_source_row(bus: &TestBus, id: i64, code: &str, modified: &str) {
    sqlx::query(
        "INSERT INTO src_bills (iId, cOpTag, cBillCode, cBillTypeName, dModify) \
         VALUES (?, 'edit', ?, 'Sales Order', ?)",
    )
    .bind(id)
    .bind(code)
    .bind(modified)
    .execute(&bus.account_pool)
    .await
    .unwrap();
}

fn engine(bus: &TestBus) -> TaskEngine {
    TaskEngine::new(
        bus.config_store.clone(),
        bus.gateways.clone(),
        bus.store.clone(),
        bus.dispatcher.clone(),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn detects_enqueues_and_dispatches_changed_rows() {
    let bus = detection_bus().await;
    add_source_row(&bus, 1, "SRC-1", "2026-08-01 10:00:00").await;
    add_source_row(&bus, 2, "SRC-2", "2026-08-01 11:00:00").await;
    add_source_row(&bus, 3, "SRC-3", "2026-08-01 09:30:00").await;

    engine(&bus).run_pass().await.unwrap();

    // Every changed row went through the write pipeline.
    assert_eq!(bus.count("bills").await, 3);
    let codes: Vec<String> = sqlx::query_scalar("SELECT cCode FROM bills ORDER BY iId")
        .fetch_all(&bus.account_pool)
        .await
        .unwrap();
    assert_eq!(codes, vec!["SRC-1", "SRC-2", "SRC-3"]);

    // All tasks resolved on the first attempt.
    assert!(bus.store.pending_tasks(100).await.unwrap().is_empty());
    let (done, attempts): (i64, i64) =
        sqlx::query_as("SELECT SUM(done), SUM(attempt_count) FROM tasks")
            .fetch_one(bus.store.pool())
            .await
            .unwrap();
    assert_eq!(done, 3);
    assert_eq!(attempts, 3);

    // Watermark sits at the newest observed modification time.
    let mark = bus.store.watermark("001", "salesorder").await.unwrap();
    assert_eq!(mark, "2026-08-01 11:00:00");
}

#[tokio::test]
async fn second_pass_reprocesses_nothing() {
    let bus = detection_bus().await;
    add_source_row(&bus, 1, "SRC-1", "2026-08-01 10:00:00").await;

    let engine = engine(&bus);
    engine.run_pass().await.unwrap();
    engine.run_pass().await.unwrap();

    assert_eq!(bus.count("bills").await, 1);
    let tasks: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tasks")
        .fetch_one(bus.store.pool())
        .await
        .unwrap();
    assert_eq!(tasks, 1);
}

#[tokio::test]
async fn watermark_advances_monotonically() {
    let bus = detection_bus().await;
    let engine = engine(&bus);

    add_source_row(&bus, 1, "SRC-1", "2026-08-01 10:00:00").await;
    engine.run_pass().await.unwrap();
    let first = bus.store.watermark("001", "salesorder").await.unwrap();

    add_source_row(&bus, 2, "SRC-2", "2026-08-02 08:00:00").await;
    engine.run_pass().await.unwrap();
    let second = bus.store.watermark("001", "salesorder").await.unwrap();

    assert!(second > first, "{second} vs {first}");

    // A pass with no changes leaves the watermark alone.
    engine.run_pass().await.unwrap();
    assert_eq!(
        bus.store.watermark("001", "salesorder").await.unwrap(),
        second
    );
}

#[tokio::test]
async fn failing_task_retries_up_to_the_cap() {
    let bus = detection_bus().await;
    bus.write_doc_type(
        "salesorder",
        r#"{
            "handler": "generic",
            "sql": { "save_head": "INSERT INTO no_such_table (x) VALUES (@cBillCode)" }
        }"#,
    );
    add_source_row(&bus, 1, "SRC-1", "2026-08-01 10:00:00").await;

    let engine = engine(&bus);
    for expected_attempts in 1..=3i32 {
        engine.run_pass().await.unwrap();
        let task = &sqlx::query_as::<_, (bool, i32, String)>(
            "SELECT done, attempt_count, result FROM tasks",
        )
        .fetch_all(bus.store.pool())
        .await
        .unwrap()[0];
        assert!(!task.0);
        assert_eq!(task.1, expected_attempts);
        assert!(!task.2.is_empty());
    }

    // Terminal-failed: out of the rotation, no fourth attempt.
    assert!(bus.store.pending_tasks(100).await.unwrap().is_empty());
    engine.run_pass().await.unwrap();
    let attempts: i32 = sqlx::query_scalar("SELECT attempt_count FROM tasks")
        .fetch_one(bus.store.pool())
        .await
        .unwrap();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn enqueue_skips_unresolved_duplicates() {
    let bus = TestBus::new().await;
    let task = NewTask {
        account_id: "001".to_string(),
        document_type: "salesorder".to_string(),
        source_record_id: "42".to_string(),
        op_tag: "edit".to_string(),
        ..NewTask::default()
    };
    assert!(bus.store.enqueue_task(&task).await.unwrap());
    assert!(!bus.store.enqueue_task(&task).await.unwrap());

    // A resolved task frees the key for a new change.
    let queued = bus.store.pending_tasks(10).await.unwrap();
    bus.store
        .record_task_attempt(&queued[0].task_id, true, "OK", chrono::Utc::now())
        .await
        .unwrap();
    let resolved = bus
        .store
        .get_task(&queued[0].task_id)
        .await
        .unwrap()
        .expect("task row");
    assert!(resolved.done);
    assert!(bus.store.enqueue_task(&task).await.unwrap());
}

#[tokio::test]
async fn overlapping_passes_are_skipped() {
    // A slow remote keeps the first pass in flight while the second
    // one arrives.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({ "result": "OK", "code": "0" })),
        )
        .mount(&server)
        .await;

    let bus = TestBus::new().await;
    bus.create_bill_tables().await;
    bus.write_doc_type(
        "salesorder",
        &format!(
            r#"{{
                "handler": "forward",
                "sql": {{ "find": "SELECT iId, cCode FROM bills WHERE iId = @iId" }},
                "forward": {{
                    "url": "{}/api/json/set",
                    "to_account": "900",
                    "to_document_type": "remoteorder"
                }}
            }}"#,
            server.uri()
        ),
    );
    sqlx::query("INSERT INTO bills (cCode, cMaker, iRows) VALUES ('SO-1', 'amy', 0)")
        .execute(&bus.account_pool)
        .await
        .unwrap();
    bus.store
        .enqueue_task(&NewTask {
            account_id: "001".to_string(),
            document_type: "salesorder".to_string(),
            source_record_id: "1".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();

    let engine = Arc::new(engine(&bus));
    let busy = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_pass().await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(!engine.run_pass().await.unwrap());
    assert!(busy.await.unwrap());

    // Exactly one dispatch attempt reached the task and the remote.
    let attempts: i32 = sqlx::query_scalar("SELECT attempt_count FROM tasks")
        .fetch_one(bus.store.pool())
        .await
        .unwrap();
    assert_eq!(attempts, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_definitions_are_skipped() {
    let bus = detection_bus().await;
    bus.write_tasks(
        r#"[{
            "enabled": false,
            "account_id": "001",
            "document_type": "salesorder",
            "extract_sql": "SELECT iId, cBillCode, dModify FROM src_bills WHERE dModify > '{watermark}'",
            "watermark_column": "dModify"
        }]"#,
    );
    add_source_row(&bus, 1, "SRC-1", "2026-08-01 10:00:00").await;

    engine(&bus).run_pass().await.unwrap();
    assert_eq!(bus.count("bills").await, 0);
    let tasks: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tasks")
        .fetch_one(bus.store.pool())
        .await
        .unwrap();
    assert_eq!(tasks, 0);
}

struct RecordingHandler {
    seen: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, definition: &TaskDefinition) -> Result<()> {
        let _ = self.seen.send(definition.document_type.clone());
        Ok(())
    }
}

#[tokio::test]
async fn custom_definitions_route_to_their_handler() {
    let bus = detection_bus().await;
    bus.write_tasks(
        r#"[{
            "account_id": "001",
            "document_type": "salesorder",
            "custom_handler": "recorder"
        }]"#,
    );
    add_source_row(&bus, 1, "SRC-1", "2026-08-01 10:00:00").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut engine = engine(&bus);
    engine.register_custom_handler("recorder", Arc::new(RecordingHandler { seen: tx }));
    engine.run_pass().await.unwrap();

    let seen = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("custom handler not invoked")
        .unwrap();
    assert_eq!(seen, "salesorder");

    // Default detection did not run for the custom definition.
    assert_eq!(bus.count("bills").await, 0);
}
