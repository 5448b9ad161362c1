//! moisture_bridge: serial soil-moisture sensor to document store and push alerts.
//!
//! # Module structure
//!
//! ```text
//! moisture_bridge
//! ├── model   : shared data types (SensorRecord, TokenRecord, Notification)
//! ├── config  : bridge.toml loader and environment credentials
//! ├── scaler  : raw ADC reading to inverted percentage
//! ├── gate    : low-moisture alert gate (threshold, cooldown, in-flight guard)
//! ├── ingest  : per-line cycle: extract, scale, store, alert
//! ├── serial  : serial port line source
//! ├── db      : PostgreSQL connection and table validation
//! ├── store   : document store trait, PostgreSQL and in-memory backends
//! ├── push    : push delivery (FCM HTTP v1, log-only fallback)
//! ├── endpoint: HTTP API (latest reading, token registration)
//! └── bridge  : startup wiring and main run loop
//! ```

pub mod bridge;
pub mod config;
pub mod db;
pub mod endpoint;
pub mod gate;
pub mod ingest;
pub mod model;
pub mod push;
pub mod scaler;
pub mod serial;
pub mod store;
