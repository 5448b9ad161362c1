//! Process wiring for the moisture bridge
//!
//! Startup order:
//! 1. validate configuration and build the scaler (an empty raw range is
//!    fatal here, never per reading)
//! 2. open the document store (PostgreSQL, or in-memory with
//!    `--memory-store`)
//! 3. choose push delivery (FCM when credentials are set, log-only otherwise)
//!
//! `run` then starts the HTTP endpoint on its own thread and drives the
//! ingest loop on the calling thread for as long as the port yields lines.
//! A port that cannot be opened, or that stops yielding, is logged and the
//! process keeps serving the last stored reading over HTTP.

use crate::config::{self, BridgeConfig};
use crate::db;
use crate::endpoint;
use crate::gate::{GatePolicy, NotificationGate};
use crate::ingest::{IngestLoop, IngestStats};
use crate::push::{FcmPush, LogOnlyPush, PushDelivery};
use crate::scaler::Scaler;
use crate::serial;
use crate::store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where documents are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Stores handed to the two activity sources.
///
/// PostgreSQL gets one connection per side; the in-memory store is shared.
pub struct Stores {
    pub ingest: Arc<dyn DocumentStore>,
    pub endpoint: Arc<dyn DocumentStore>,
}

impl Stores {
    pub fn open(backend: StoreBackend) -> Result<Self, db::DbConfigError> {
        match backend {
            StoreBackend::Memory => {
                let shared: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
                Ok(Self { ingest: Arc::clone(&shared), endpoint: shared })
            }
            StoreBackend::Postgres => {
                let ingest = PgDocumentStore::new(db::connect_and_verify()?);
                let endpoint = PgDocumentStore::new(db::connect_with_validation()?);
                Ok(Self { ingest: Arc::new(ingest), endpoint: Arc::new(endpoint) })
            }
        }
    }
}

/// Picks FCM when credentials are present, otherwise log-only delivery.
pub fn push_from_env(config: &BridgeConfig) -> Result<Arc<dyn PushDelivery>, Box<dyn Error>> {
    match config::push_credentials_from_env() {
        Some(credentials) => {
            let timeout = Duration::from_secs(config.alert.delivery_timeout_secs);
            log::info!("push delivery via FCM project {}", credentials.project_id);
            Ok(Arc::new(FcmPush::new(&credentials, timeout)?))
        }
        None => {
            log::warn!("FCM_PROJECT_ID / FCM_ACCESS_TOKEN not set; alerts will only be logged");
            Ok(Arc::new(LogOnlyPush))
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct Bridge {
    config: BridgeConfig,
    scaler: Scaler,
    stores: Stores,
    gate: Arc<NotificationGate>,
    push: Arc<dyn PushDelivery>,
}

impl Bridge {
    /// Validates configuration and opens every collaborator except the
    /// serial port.
    pub fn initialize(config: BridgeConfig, backend: StoreBackend) -> Result<Self, Box<dyn Error>> {
        config.validate()?;
        let scaler = Scaler::new(config.scaling)?;
        let stores = Stores::open(backend)?;
        let push = push_from_env(&config)?;
        let gate = Arc::new(NotificationGate::new(GatePolicy::from(&config.alert)));

        Ok(Self { config, scaler, stores, gate, push })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Builds the ingest loop with gate evaluations on the worker pool.
    pub fn ingest_loop(&self) -> IngestLoop {
        IngestLoop::new(
            self.scaler,
            Arc::clone(&self.stores.ingest),
            Arc::clone(&self.gate),
            Arc::clone(&self.push),
        )
        .with_workers(self.config.alert.workers)
    }

    /// Starts the HTTP endpoint in a background thread.
    pub fn spawn_endpoint(&self) -> std::thread::JoinHandle<()> {
        let port = self.config.http.port;
        let documents = Arc::clone(&self.stores.endpoint);

        std::thread::spawn(move || {
            if let Err(e) = endpoint::start_endpoint_server(port, documents) {
                log::error!("endpoint server error: {}", e);
            }
        })
    }

    /// Opens the serial port and ingests until the source ends.
    ///
    /// An open failure is a transport error like any other: it is logged,
    /// counted, and the empty stats are returned.
    pub fn run_ingest(&self) -> IngestStats {
        let mut ingest = self.ingest_loop();

        match serial::open_serial(&self.config.serial) {
            Ok(lines) => ingest.run(lines),
            Err(e) => {
                log::error!("failed to open serial port {}: {}", self.config.serial.path, e);
                let mut stats = ingest.stats().clone();
                stats.source_errors += 1;
                stats
            }
        }
    }

    /// Starts the endpoint, then ingests on the calling thread.
    ///
    /// Returns only once both the line source and the endpoint are done, so
    /// a dead serial port never takes the HTTP API down with it.
    pub fn run(&self) -> IngestStats {
        let endpoint = self.spawn_endpoint();

        let stats = self.run_ingest();
        log::warn!(
            "serial ingest stopped after {} lines ({} stored); HTTP API stays up",
            stats.lines,
            stats.stored
        );

        if endpoint.join().is_err() {
            log::error!("endpoint thread panicked");
        }
        stats
    }
}
