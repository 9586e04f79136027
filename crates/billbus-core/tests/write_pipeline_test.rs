// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic write pipeline: gates, transaction, audit

mod common;

use billbus_core::DocumentRequest;
use billbus_core::envelope::FieldMap;
use billbus_core::store::BusStore;
use common::TestBus;
use serde_json::json;

const SALESORDER: &str = r#"{
    "handler": "generic",
    "log_payload": true,
    "default_maker": "bus",
    "sql": {
        "find": "SELECT iId, cCode, cMaker FROM bills WHERE 1=1 {where}",
        "save_head": "INSERT INTO bills (cCode, cMaker, iRows, cSrcID) VALUES ('SO-' || @iRows, @cMaker, @iRows, @cSrcID) RETURNING iId, cCode, 0 AS iIds",
        "save_body": "INSERT INTO bill_rows (iId, iIds, iRowNo, cInvCode, iQty, m_code) VALUES (@iId, @iIds, @iRowNo, @cInvCode, @iQty, @m_cCode)",
        "after_save": "UPDATE bills SET cCloser = 'auto' WHERE iId = @iId"
    }
}"#;

async fn bus() -> TestBus {
    let bus = TestBus::new().await;
    bus.create_bill_tables().await;
    bus.write_doc_type("salesorder", SALESORDER);
    bus
}

fn order_request(source_id: &str, rows: &[(&str, &str)]) -> DocumentRequest {
    DocumentRequest::from_json(&json!({
        "billtype": "salesorder",
        "head": { "cSrcID": source_id, "cMaker": "amy" },
        "body": rows
            .iter()
            .map(|(inv, qty)| json!({ "cInvCode": inv, "iQty": qty }))
            .collect::<Vec<_>>(),
    }))
}

#[tokio::test]
async fn write_runs_head_body_and_after_save() {
    let bus = bus().await;
    let envelope = bus
        .dispatcher
        .write(&order_request("EXT-1", &[("A", "2"), ("B", "5")]))
        .await;

    assert!(envelope.is_ok(), "desc: {}", envelope.desc);
    assert_eq!(envelope.new_bill_id, "1");
    assert_eq!(envelope.new_bill_code, "SO-2");
    assert_eq!(envelope.c_src_sys_id, "EXT-1");

    assert_eq!(bus.count("bills").await, 1);
    assert_eq!(bus.count("bill_rows").await, 2);

    // Consecutive sub-ids from the head result, ordinal row numbers and
    // the re-prefixed head column.
    let rows: Vec<(i64, i64, String)> =
        sqlx::query_as("SELECT iIds, iRowNo, m_code FROM bill_rows ORDER BY iIds")
            .fetch_all(&bus.account_pool)
            .await
            .unwrap();
    assert_eq!(rows[0], (1, 1, "SO-2".to_string()));
    assert_eq!(rows[1], (2, 2, "SO-2".to_string()));

    let closer: String = sqlx::query_scalar("SELECT cCloser FROM bills WHERE iId = 1")
        .fetch_one(&bus.account_pool)
        .await
        .unwrap();
    assert_eq!(closer, "auto");

    // Audit: one successful row with the payload persisted.
    let audit = bus
        .store
        .find_successful_audit("001", "salesorder", "EXT-1")
        .await
        .unwrap()
        .expect("audit row");
    assert!(audit.ok);
    assert_eq!(audit.new_id, "1");
    assert_eq!(audit.operator, "amy");
    assert!(audit.payload.contains("EXT-1"));
}

#[tokio::test]
async fn duplicate_source_id_is_rejected_without_side_effects() {
    let bus = bus().await;
    let first = bus
        .dispatcher
        .write(&order_request("EXT-2", &[("A", "1")]))
        .await;
    assert!(first.is_ok());

    let second = bus
        .dispatcher
        .write(&order_request("EXT-2", &[("A", "1")]))
        .await;
    assert!(!second.is_ok());
    assert_eq!(second.code, "12");
    assert!(second.desc.contains("SO-1"), "desc: {}", second.desc);
    assert_eq!(bus.count("bills").await, 1);
    assert_eq!(bus.count("bill_rows").await, 1);
}

#[tokio::test]
async fn failing_body_row_rolls_back_the_document() {
    let bus = bus().await;
    // "-" binds NULL, which violates the NOT NULL constraint on iQty.
    let envelope = bus
        .dispatcher
        .write(&order_request("EXT-3", &[("A", "1"), ("B", "-")]))
        .await;

    assert!(!envelope.is_ok());
    assert_eq!(envelope.code, "20");
    assert_eq!(bus.count("bills").await, 0);
    assert_eq!(bus.count("bill_rows").await, 0);

    // The failed attempt is still audited.
    let failures: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM audit_log WHERE ok = 0 AND source_id = 'EXT-3'")
            .fetch_one(bus.store.pool())
            .await
            .unwrap();
    assert_eq!(failures, 1);

    // The source id stays available for a corrected resubmission.
    let retry = bus
        .dispatcher
        .write(&order_request("EXT-3", &[("A", "1"), ("B", "2")]))
        .await;
    assert!(retry.is_ok(), "desc: {}", retry.desc);
}

#[tokio::test]
async fn missing_source_id_skips_duplicate_check() {
    let bus = bus().await;
    for _ in 0..2 {
        let envelope = bus.dispatcher.write(&order_request("", &[("A", "1")])).await;
        assert!(envelope.is_ok(), "desc: {}", envelope.desc);
    }
    assert_eq!(bus.count("bills").await, 2);
}

#[tokio::test]
async fn default_maker_fills_missing_operator() {
    let bus = bus().await;
    let request = DocumentRequest::from_json(&json!({
        "billtype": "salesorder",
        "head": { "cSrcID": "EXT-4" }
    }));
    assert!(bus.dispatcher.write(&request).await.is_ok());
    let maker: String = sqlx::query_scalar("SELECT cMaker FROM bills WHERE cSrcID = 'EXT-4'")
        .fetch_one(&bus.account_pool)
        .await
        .unwrap();
    assert_eq!(maker, "bus");
}

#[tokio::test]
async fn fetch_applies_the_caller_filter() {
    let bus = bus().await;
    for code in ["X1", "X2"] {
        sqlx::query("INSERT INTO bills (cCode, cMaker, iRows) VALUES (?, 'amy', 0)")
            .bind(code)
            .execute(&bus.account_pool)
            .await
            .unwrap();
    }

    let all = bus
        .dispatcher
        .fetch(&DocumentRequest::from_json(&json!({ "billtype": "salesorder" })))
        .await;
    assert!(all.is_ok());
    assert_eq!(all.data.len(), 2);

    let filtered = bus
        .dispatcher
        .fetch(&DocumentRequest::from_json(&json!({
            "billtype": "salesorder",
            "where": "cCode = 'X1'"
        })))
        .await;
    assert_eq!(filtered.data.len(), 1);
    assert_eq!(
        filtered.data[0].get("cCode").map(String::as_str),
        Some("X1")
    );
}

#[tokio::test]
async fn guarded_type_requires_a_live_token() {
    let bus = bus().await;
    bus.write_doc_type(
        "guarded",
        r#"{
            "handler": "generic",
            "require_token": true,
            "sql": {
                "save_head": "INSERT INTO bills (cCode, cMaker, iRows) VALUES ('G-1', @cMaker, @iRows) RETURNING iId, cCode, 0 AS iIds"
            }
        }"#,
    );

    let mut request = DocumentRequest {
        document_type: "guarded".to_string(),
        head: FieldMap::new(),
        ..DocumentRequest::default()
    };
    let denied = bus.dispatcher.write(&request).await;
    assert_eq!(denied.code, "11");
    assert_eq!(bus.count("bills").await, 0);

    request.token = Some(bus.dispatcher.tokens().issue("amy").await.unwrap());
    let allowed = bus.dispatcher.write(&request).await;
    assert!(allowed.is_ok(), "desc: {}", allowed.desc);
    assert_eq!(bus.count("bills").await, 1);
}

#[tokio::test]
async fn unknown_targets_fold_into_the_envelope() {
    let bus = bus().await;

    let bad_type = bus
        .dispatcher
        .write(&DocumentRequest::from_json(&json!({ "billtype": "nope" })))
        .await;
    assert_eq!(bad_type.code, "10");

    let bad_account = bus
        .dispatcher
        .write(&DocumentRequest::from_json(&json!({
            "accno": "099",
            "billtype": "salesorder"
        })))
        .await;
    assert_eq!(bad_account.code, "10");

    bus.write_doc_type("odd", r#"{ "handler": "bespoke" }"#);
    let bad_handler = bus
        .dispatcher
        .write(&DocumentRequest::from_json(&json!({ "billtype": "odd" })))
        .await;
    assert_eq!(bad_handler.code, "13");
}
