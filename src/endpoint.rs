//! HTTP endpoint for the companion app
//!
//! Endpoints:
//! - GET /               - Liveness text
//! - GET /api/sensorData - Latest scaled reading
//! - POST /api/saveToken - Register the push delivery token (`{"token": "..."}`)
//!
//! Routing is a plain function over (method, path, body) so handlers can be
//! exercised without a socket; `EndpointServer` only moves bytes between
//! `tiny_http` and `route`.

use crate::store::{self, DocumentStore};
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tiny_http::{Header, Method, Response, Server, StatusCode};

/// Largest request body accepted (a token is a few hundred bytes)
pub const MAX_BODY_BYTES: usize = 16 * 1024;

const LIVENESS_TEXT: &str = "Moisture bridge is running.";

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ApiBody,
}

impl ApiResponse {
    fn json(status: u16, body: Value) -> Self {
        Self { status, body: ApiBody::Json(body) }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    fn into_http(self) -> Response<Cursor<Vec<u8>>> {
        let (bytes, content_type) = match self.body {
            ApiBody::Json(value) => (
                serde_json::to_vec_pretty(&value).unwrap_or_default(),
                "application/json",
            ),
            ApiBody::Text(text) => (text.into_bytes(), "text/plain; charset=utf-8"),
        };

        let mut response = Response::from_data(bytes).with_status_code(StatusCode(self.status));
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
            response.add_header(header);
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Dispatches one request. `url` may carry a query string; it is ignored.
pub fn route(method: &Method, url: &str, body: &[u8], documents: &dyn DocumentStore) -> ApiResponse {
    let path = url.split('?').next().unwrap_or(url);

    match (method, path) {
        (Method::Get, "/") => ApiResponse {
            status: 200,
            body: ApiBody::Text(LIVENESS_TEXT.to_string()),
        },
        (Method::Get, "/api/sensorData") => handle_sensor_data(documents),
        (Method::Post, "/api/saveToken") | (Method::Put, "/api/saveToken") => {
            handle_save_token(documents, body)
        }
        _ => ApiResponse::json(
            404,
            json!({
                "error": "Not found",
                "available_endpoints": ["GET /", "GET /api/sensorData", "POST /api/saveToken"]
            }),
        ),
    }
}

/// Handle GET /api/sensorData
fn handle_sensor_data(documents: &dyn DocumentStore) -> ApiResponse {
    match store::load_latest_reading(documents) {
        Ok(Some(record)) => match serde_json::to_value(&record) {
            Ok(value) => ApiResponse::json(200, value),
            Err(e) => {
                log::error!("error encoding sensor data: {}", e);
                ApiResponse::error(500, "Failed to retrieve sensor data")
            }
        },
        Ok(None) => ApiResponse::error(404, "No sensor data found"),
        Err(e) => {
            log::error!("error retrieving sensor data: {}", e);
            ApiResponse::error(500, "Failed to retrieve sensor data")
        }
    }
}

/// Pulls a non-empty string `token` out of a JSON body.
fn parse_token(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Handle POST /api/saveToken
fn handle_save_token(documents: &dyn DocumentStore, body: &[u8]) -> ApiResponse {
    let token = match parse_token(body) {
        Some(token) => token,
        None => return ApiResponse::error(400, "Token is required"),
    };

    match store::save_token(documents, &token) {
        Ok(()) => {
            log::info!("delivery token registered");
            ApiResponse::json(200, json!({ "message": "Token saved successfully" }))
        }
        Err(e) => {
            log::error!("error saving token: {}", e);
            ApiResponse::error(500, "Failed to save token")
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

pub struct EndpointServer {
    server: Server,
    documents: Arc<dyn DocumentStore>,
}

impl EndpointServer {
    /// Binds the listener, e.g. `"0.0.0.0:3000"` or `"127.0.0.1:0"`.
    pub fn bind(addr: &str, documents: Arc<dyn DocumentStore>) -> Result<Self, String> {
        let server = Server::http(addr)
            .map_err(|e| format!("Failed to start HTTP server on {}: {}", addr, e))?;

        Ok(Self { server, documents })
    }

    /// Actual bound address (useful after binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serves requests one at a time until the listener shuts down.
    pub fn serve(self) {
        for mut request in self.server.incoming_requests() {
            let started = Instant::now();
            let method = request.method().clone();
            let url = request.url().to_string();

            let mut body = Vec::new();
            let read = request
                .as_reader()
                .take(MAX_BODY_BYTES as u64 + 1)
                .read_to_end(&mut body);

            let response = match read {
                Err(e) => {
                    log::warn!("failed to read request body: {}", e);
                    ApiResponse::error(400, "Unreadable request body")
                }
                Ok(n) if n > MAX_BODY_BYTES => ApiResponse::error(413, "Request body too large"),
                Ok(_) => route(&method, &url, &body, self.documents.as_ref()),
            };

            let status = response.status;
            if let Err(e) = request.respond(response.into_http()) {
                log::warn!("failed to send response: {}", e);
            }

            log::info!("{} {} {} - {} ms", method, url, status, started.elapsed().as_millis());
        }
    }
}

/// Start HTTP endpoint server on the specified port (blocks)
pub fn start_endpoint_server(port: u16, documents: Arc<dyn DocumentStore>) -> Result<(), String> {
    let server = EndpointServer::bind(&format!("0.0.0.0:{}", port), documents)?;
    log::info!("HTTP endpoint listening on http://0.0.0.0:{}", port);
    server.serve();
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
