// Integration tests: HTTP and WebSocket endpoints

mod common;

use axum_test::TestServer;
use common::{T0, aggregate, event, iso};
use scrapwatch::aggregator::Aggregator;
use scrapwatch::clock::ManualClock;
use scrapwatch::dashboard::Dashboard;
use scrapwatch::history_cache::RollingHistoryCache;
use scrapwatch::models::AggregatedResult;
use scrapwatch::pipeline::Pipeline;
use scrapwatch::routes::{self, AppState};
use scrapwatch::scrap_repo::ScrapRepo;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;

fn test_state() -> AppState {
    let (tx, _) = broadcast::channel(64);
    let pipeline = Arc::new(Pipeline::new(Arc::new(Aggregator::default()), tx));
    let dashboard = Arc::new(Dashboard::new(
        RollingHistoryCache::default(),
        Arc::new(ManualClock::new(T0)),
    ));
    AppState {
        pipeline,
        dashboard,
        repo: None,
        ws_clients: Arc::new(AtomicUsize::new(0)),
    }
}

fn test_server(state: AppState) -> TestServer {
    TestServer::new(routes::app(state))
}

/// Build TestServer with http_transport (required for WebSocket tests).
fn test_server_with_http(state: AppState) -> TestServer {
    TestServer::builder()
        .http_transport()
        .build(routes::app(state))
}

fn payload(machine_id: &str, scrap_index: i64, value: f64, at_ms: i64) -> String {
    serde_json::to_string(&event(machine_id, scrap_index, value, at_ms)).unwrap()
}

#[tokio::test]
async fn test_root_endpoint() {
    let server = test_server(test_state());
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("scrapwatch is running");
}

#[tokio::test]
async fn test_version_endpoint() {
    let server = test_server(test_state());
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(
        json.get("name").and_then(|v| v.as_str()),
        Some("scrapwatch")
    );
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_ingest_returns_windowed_aggregate() {
    let server = test_server(test_state());
    server
        .post("/api/machines/A/scrap")
        .text(payload("A", 1, 3.0, T0))
        .await
        .assert_status_ok();
    let response = server
        .post("/api/machines/A/scrap")
        .text(payload("A", 1, 2.0, T0 + 500))
        .await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["aggregate"]["machineId"], "A");
    assert_eq!(json["aggregate"]["scrapIndex"], 1);
    assert_eq!(json["aggregate"]["sumLast60s"], 5.0);
    assert_eq!(json["aggregate"]["avgLast60s"], 2.5);
    assert_eq!(json["aggregate"]["timestamp"], iso(T0 + 500));
    assert_eq!(json["persistence"], "disabled");
}

#[tokio::test]
async fn test_ingest_rejects_machine_mismatch() {
    let state = test_state();
    let server = test_server(state.clone());
    let response = server
        .post("/api/machines/B/scrap")
        .text(payload("A", 1, 3.0, T0))
        .await;
    response.assert_status_bad_request();
    assert_eq!(state.pipeline.aggregator().key_count(), 0);
}

#[tokio::test]
async fn test_ingest_rejects_bad_timestamp_and_malformed_json() {
    let state = test_state();
    let server = test_server(state.clone());
    let bad_ts = r#"{"machineId":"A","scrapIndex":1,"value":1,"timestamp":"not a time"}"#;
    server
        .post("/api/machines/A/scrap")
        .text(bad_ts)
        .await
        .assert_status_bad_request();
    server
        .post("/api/machines/A/scrap")
        .text("{ nope")
        .await
        .assert_status_bad_request();
    assert_eq!(state.pipeline.stats().ingested(), 0);
}

#[tokio::test]
async fn test_ingest_rejects_invalid_sample() {
    let state = test_state();
    let server = test_server(state.clone());
    let response = server
        .post("/api/machines/A/scrap")
        .text(payload("A", 0, 1.0, T0))
        .await;
    response.assert_status_bad_request();
    let json: serde_json::Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("invalid sample"));
    assert_eq!(state.pipeline.stats().rejected(), 1);
}

#[tokio::test]
async fn test_history_unknown_machine_is_404() {
    let server = test_server(test_state());
    server
        .get("/api/machines/nobody/history")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_history_after_tick() {
    let state = test_state();
    state.dashboard.record(aggregate("A", 2, 4.0, 2.0, T0));
    state.dashboard.tick();
    let server = test_server(state);
    let response = server.get("/api/machines/A/history").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["labels"].as_array().unwrap().len(), 1);
    assert_eq!(json["sum"]["2"][0], 4.0);
    assert_eq!(json["avg"]["2"][0], 2.0);
    assert_eq!(json["sum"]["1"][0], 0.0);
}

#[tokio::test]
async fn test_groups_filtering() {
    let state = test_state();
    state.dashboard.record(aggregate("A", 1, 5.0, 2.5, T0));
    state.dashboard.record(aggregate("A", 2, 1.0, 1.0, T0 + 1));
    state.dashboard.record(aggregate("B", 2, 4.0, 4.0, T0 + 2));
    state.dashboard.record(aggregate("C", 1, 9.0, 9.0, T0 + 3));
    let server = test_server(state);

    let all: serde_json::Value = server.get("/api/groups").await.json();
    assert_eq!(all.as_array().unwrap().len(), 3);

    let response = server
        .get("/api/groups")
        .add_query_param("indices", "2")
        .await;
    response.assert_status_ok();
    let groups: serde_json::Value = response.json();
    let groups = groups.as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["machineId"], "A");
    assert_eq!(groups[0]["totalSum"], 1.0);
    assert_eq!(groups[1]["machineId"], "B");
    assert_eq!(groups[1]["lastUpdate"], iso(T0 + 2));

    let only_c: serde_json::Value = server
        .get("/api/groups")
        .add_query_param("machines", "C")
        .await
        .json();
    assert_eq!(only_c.as_array().unwrap().len(), 1);

    server
        .get("/api/groups")
        .add_query_param("indices", "two")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_filters_endpoint() {
    let state = test_state();
    state.dashboard.record(aggregate("B", 3, 1.0, 1.0, T0));
    state.dashboard.record(aggregate("A", 1, 1.0, 1.0, T0));
    let server = test_server(state);
    let json: serde_json::Value = server.get("/api/filters").await.json();
    assert_eq!(json["machines"], serde_json::json!(["A", "B"]));
    assert_eq!(json["indices"], serde_json::json!([1, 3]));
}

#[tokio::test]
async fn test_records_without_store_is_503() {
    let server = test_server(test_state());
    server
        .get("/api/records")
        .await
        .assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_records_with_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("scrap.db");
    let repo = Arc::new(ScrapRepo::connect(db_path.to_str().unwrap(), 3, 2).await.unwrap());
    repo.init().await.unwrap();
    repo.save_records(&[scrapwatch::models::ScrapRecord {
        machine_id: "A".into(),
        scrap_index: 1,
        value: 2.0,
        timestamp_ms: T0,
    }])
    .await
    .unwrap();

    let mut state = test_state();
    state.repo = Some(repo);
    let server = test_server(state);
    let response = server.get("/api/records").add_query_param("limit", 5).await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["count"], 1);
    assert_eq!(json["records"][0]["machineId"], "A");
    assert_eq!(json["records"][0]["timestampMs"], T0);
}

#[tokio::test]
async fn test_totals_compare_live_window_with_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("scrap.db");
    let repo = Arc::new(ScrapRepo::connect(db_path.to_str().unwrap(), 3, 2).await.unwrap());
    repo.init().await.unwrap();

    let state = test_state();
    let samples = [(T0, 4.0), (T0 + 30_000, 1.0), (T0 + 70_000, 2.0)];
    let mut records = Vec::new();
    for (at_ms, value) in samples {
        state.pipeline.process(&event("A", 1, value, at_ms)).unwrap();
        records.push(scrapwatch::models::ScrapRecord {
            machine_id: "A".into(),
            scrap_index: 1,
            value,
            timestamp_ms: at_ms,
        });
    }
    repo.save_records(&records).await.unwrap();

    let mut state = state;
    state.repo = Some(repo);
    let server = test_server(state);
    let response = server.get("/api/machines/A/scrap/1/totals").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["windowEnd"], iso(T0 + 70_000));
    // T0 has fallen out of the window on both sides.
    assert_eq!(json["live"]["sum"], 3.0);
    assert_eq!(json["live"]["count"], 2);
    assert_eq!(json["stored"]["sum"], 3.0);
    assert_eq!(json["stored"]["count"], 2);

    server
        .get("/api/machines/A/scrap/9/totals")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_totals_without_store_is_503() {
    let state = test_state();
    state.pipeline.process(&event("A", 1, 1.0, T0)).unwrap();
    let server = test_server(state);
    server
        .get("/api/machines/A/scrap/1/totals")
        .await
        .assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

// --- WebSocket message tests (require http_transport + ws feature) ---
// Receive until we get JSON of the wanted shape (server may send Ping or other messages first).

async fn receive_first_json_text<T: serde::de::DeserializeOwned>(
    ws: &mut axum_test::TestWebSocket,
) -> T {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<T>(&text) {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for JSON"
        );
    }
}

async fn receive_message_of_type(ws: &mut axum_test::TestWebSocket, kind: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
    loop {
        let text = ws.receive_text().await;
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&text)
            && v["type"] == kind
        {
            return v;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} message",
            kind
        );
    }
}

#[tokio::test]
async fn test_ws_scrap_sends_snapshot_first() {
    let state = test_state();
    state.dashboard.record(aggregate("A", 1, 3.0, 3.0, T0));
    let server = test_server_with_http(state);
    let mut ws = server.get_websocket("/ws/scrap").await.into_websocket().await;
    let snapshot = receive_message_of_type(&mut ws, "snapshot").await;
    let entries = snapshot["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["machineId"], "A");
    assert_eq!(entries[0]["sumLast60s"], 3.0);
}

#[tokio::test]
async fn test_ws_scrap_streams_aggregates() {
    let state = test_state();
    let server = test_server_with_http(state.clone());
    let mut ws = server.get_websocket("/ws/scrap").await.into_websocket().await;
    receive_message_of_type(&mut ws, "snapshot").await;

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        pipeline.process(&event("B", 2, 4.0, T0)).unwrap();
    });
    let received: AggregatedResult = receive_first_json_text(&mut ws).await;
    assert_eq!(received.machine_id, "B");
    assert_eq!(received.scrap_index, 2);
    assert_eq!(received.sum, 4.0);
    assert_eq!(received.timestamp, iso(T0));
}

#[tokio::test]
async fn test_ws_dashboard_filters_per_viewer() {
    let state = test_state();
    state.dashboard.record(aggregate("A", 1, 5.0, 2.5, T0));
    state.dashboard.record(aggregate("B", 2, 4.0, 4.0, T0));
    let server = test_server_with_http(state);
    let mut ws = server
        .get_websocket("/ws/dashboard")
        .await
        .into_websocket()
        .await;

    let initial = receive_message_of_type(&mut ws, "groups").await;
    assert_eq!(initial["groups"].as_array().unwrap().len(), 2);
    assert_eq!(initial["machines"], serde_json::json!(["A", "B"]));

    ws.send_json(&serde_json::json!({ "type": "selectIndex", "index": 2 }))
        .await;
    let filtered = receive_message_of_type(&mut ws, "groups").await;
    let groups = filtered["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["machineId"], "B");
}

#[tokio::test]
async fn test_ws_dashboard_history_and_bad_command() {
    let state = test_state();
    state.dashboard.record(aggregate("A", 1, 5.0, 2.5, T0));
    state.dashboard.tick();
    let server = test_server_with_http(state);
    let mut ws = server
        .get_websocket("/ws/dashboard")
        .await
        .into_websocket()
        .await;
    receive_message_of_type(&mut ws, "groups").await;

    ws.send_json(&serde_json::json!({ "type": "history", "machineId": "A" }))
        .await;
    let history = receive_message_of_type(&mut ws, "history").await;
    assert_eq!(history["machineId"], "A");
    assert_eq!(history["history"]["sum"]["1"][0], 5.0);

    ws.send_json(&serde_json::json!({ "type": "history", "machineId": "Z" }))
        .await;
    let missing = receive_message_of_type(&mut ws, "history").await;
    assert!(missing["history"].is_null());

    ws.send_text("{\"type\":\"dance\"}").await;
    let error = receive_message_of_type(&mut ws, "error").await;
    assert!(error["message"].as_str().unwrap().starts_with("bad command"));
}
