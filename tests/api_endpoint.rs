//! Integration tests for the HTTP endpoint
//!
//! Binds a real `tiny_http` listener on an ephemeral port and talks to it
//! with a blocking `reqwest` client, sharing the in-memory document store
//! with an inline ingest loop. The last test runs the whole bridge with a
//! serial device that does not exist.
//!
//! Run with: cargo test --test api_endpoint

mod common;

use chrono::Utc;
use common::RecordingPush;
use moisture_bridge::bridge::{Bridge, StoreBackend};
use moisture_bridge::config::{BridgeConfig, ScaleRange};
use moisture_bridge::endpoint::{EndpointServer, MAX_BODY_BYTES};
use moisture_bridge::gate::{GatePolicy, NotificationGate};
use moisture_bridge::ingest::IngestLoop;
use moisture_bridge::scaler::Scaler;
use moisture_bridge::store::{self, MemoryDocumentStore};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn start_server(documents: Arc<MemoryDocumentStore>) -> SocketAddr {
    let server = EndpointServer::bind("127.0.0.1:0", documents).expect("bind test listener");
    let addr = server.local_addr().expect("ip listener");
    std::thread::spawn(move || server.serve());
    addr
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::new()
}

/// `{"token":"aaa…"}` padded to exactly `len` bytes
fn token_body(len: usize) -> String {
    let overhead = r#"{"token":""}"#.len();
    format!(r#"{{"token":"{}"}}"#, "a".repeat(len - overhead))
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port");
    listener.local_addr().unwrap().port()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_liveness_route() {
    let addr = start_server(Arc::new(MemoryDocumentStore::new()));

    let response = client().get(url(addr, "/")).send().unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert!(!response.text().unwrap().is_empty());
}

#[test]
fn test_sensor_data_before_and_after_ingest() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let addr = start_server(documents.clone());

    let before = client().get(url(addr, "/api/sensorData")).send().unwrap();
    assert_eq!(before.status().as_u16(), 404);
    let body: Value = before.json().unwrap();
    assert_eq!(body["error"], "No sensor data found");

    let mut ingest = IngestLoop::new(
        Scaler::new(ScaleRange::default()).unwrap(),
        documents.clone(),
        Arc::new(NotificationGate::new(GatePolicy::default())),
        Arc::new(RecordingPush::new()),
    );
    ingest.process_line("2225\r\n", Utc::now());

    let after = client().get(url(addr, "/api/sensorData")).send().unwrap();
    assert_eq!(after.status().as_u16(), 200);
    assert_eq!(
        after.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let body: Value = after.json().unwrap();
    assert!((body["value"].as_f64().unwrap() - 50.0).abs() < 1e-9);
    assert!(body["timestamp"].is_string());
}

#[test]
fn test_save_token_empty_body_is_400() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let addr = start_server(documents.clone());

    let response = client().post(url(addr, "/api/saveToken")).send().unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().unwrap();
    assert_eq!(body["error"], "Token is required");
    assert!(documents.is_empty());
}

#[test]
fn test_save_token_then_lookup() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let addr = start_server(documents.clone());

    let response = client()
        .post(url(addr, "/api/saveToken"))
        .json(&serde_json::json!({ "token": "abc" }))
        .send()
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().unwrap();
    assert_eq!(body["message"], "Token saved successfully");
    assert_eq!(store::load_token(documents.as_ref()).unwrap().as_deref(), Some("abc"));
}

#[test]
fn test_unknown_route_is_404() {
    let addr = start_server(Arc::new(MemoryDocumentStore::new()));

    let response = client().get(url(addr, "/api/history")).send().unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[test]
fn test_body_at_cap_is_accepted() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let addr = start_server(documents.clone());
    let body = token_body(MAX_BODY_BYTES);
    assert_eq!(body.len(), MAX_BODY_BYTES);

    let response = client()
        .post(url(addr, "/api/saveToken"))
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let token = store::load_token(documents.as_ref()).unwrap().unwrap();
    assert_eq!(token.len(), MAX_BODY_BYTES - r#"{"token":""}"#.len());
}

#[test]
fn test_body_over_cap_is_413() {
    let documents = Arc::new(MemoryDocumentStore::new());
    let addr = start_server(documents.clone());
    let body = token_body(MAX_BODY_BYTES + 1);

    let response = client()
        .post(url(addr, "/api/saveToken"))
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .unwrap();

    assert_eq!(response.status().as_u16(), 413);
    assert!(documents.is_empty(), "oversized body must not reach the store");
}

#[test]
fn test_api_survives_missing_serial_port() {
    let mut config = BridgeConfig::default();
    config.serial.path = "/dev/no-such-moisture-board".to_string();
    config.http.port = free_port();
    let port = config.http.port;

    let bridge = Bridge::initialize(config, StoreBackend::Memory).unwrap();
    let running = std::thread::spawn(move || bridge.run());

    let sensor_url = format!("http://127.0.0.1:{}/api/sensorData", port);
    let mut status = None;
    for _ in 0..50 {
        if let Ok(response) = client().get(&sensor_url).send() {
            status = Some(response.status().as_u16());
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    assert_eq!(status, Some(404), "API should answer with no data yet");
    assert!(!running.is_finished(), "bridge must keep serving after the serial failure");
}
