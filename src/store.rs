//! Document store used for the latest reading and the delivery token.
//!
//! The store is a flat `(collection, key) -> JSON body` map with upsert
//! semantics; every write replaces the previous body. Two implementations:
//!
//! - `PgDocumentStore`: `bridge.documents` table in PostgreSQL
//! - `MemoryDocumentStore`: in-process map (tests, `--memory-store` runs)
//!
//! The typed helpers at the bottom are what the rest of the crate calls.

use crate::db::{DOCUMENT_SCHEMA, DOCUMENT_TABLE};
use crate::model::{
    SensorRecord, TokenRecord, SENSOR_COLLECTION, SENSOR_DOC_KEY, TOKEN_COLLECTION, TOKEN_DOC_KEY,
};
use chrono::Utc;
use postgres::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    /// The database rejected or failed the statement
    Database(postgres::Error),
    /// A stored body did not match the expected record shape
    Decode(serde_json::Error),
    /// The backend is not reachable (used by in-process stores and fakes)
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::Decode(e) => write!(f, "stored document has unexpected shape: {}", e),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<postgres::Error> for StoreError {
    fn from(e: postgres::Error) -> Self {
        StoreError::Database(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Keyed JSON document storage with last-write-wins semantics.
pub trait DocumentStore: Send + Sync {
    /// Upsert: creates or fully replaces the document.
    fn set_document(&self, collection: &str, key: &str, body: &Value) -> Result<(), StoreError>;

    /// Returns `None` when the document has never been written.
    fn get_document(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Document store backed by the `bridge.documents` table.
///
/// `postgres::Client` needs `&mut` for every query, so the connection sits
/// behind a mutex. Open one store per thread that issues queries
/// concurrently (the HTTP endpoint gets its own).
pub struct PgDocumentStore {
    client: Mutex<Client>,
    upsert_sql: String,
    select_sql: String,
}

impl PgDocumentStore {
    pub fn new(client: Client) -> Self {
        let table = format!("{}.{}", DOCUMENT_SCHEMA, DOCUMENT_TABLE);
        Self {
            client: Mutex::new(client),
            upsert_sql: format!(
                "INSERT INTO {} (collection, doc_key, body, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (collection, doc_key) DO UPDATE SET
                    body = EXCLUDED.body,
                    updated_at = EXCLUDED.updated_at",
                table
            ),
            select_sql: format!(
                "SELECT body FROM {} WHERE collection = $1 AND doc_key = $2",
                table
            ),
        }
    }

    fn client(&self) -> MutexGuard<'_, Client> {
        // A poisoned lock only means another thread panicked mid-query; the
        // connection itself is still usable or will report its own error.
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentStore for PgDocumentStore {
    fn set_document(&self, collection: &str, key: &str, body: &Value) -> Result<(), StoreError> {
        self.client().execute(
            self.upsert_sql.as_str(),
            &[&collection, &key, body, &Utc::now()],
        )?;
        Ok(())
    }

    fn get_document(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let rows = self.client().query(self.select_sql.as_str(), &[&collection, &key])?;

        Ok(rows.first().map(|row| row.get::<_, Value>(0)))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-process document store. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn set_document(&self, collection: &str, key: &str, body: &Value) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((collection.to_string(), key.to_string()), body.clone());
        Ok(())
    }

    fn get_document(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Typed helpers
// ---------------------------------------------------------------------------

/// Overwrites the latest sensor reading.
pub fn save_latest_reading(store: &dyn DocumentStore, record: &SensorRecord) -> Result<(), StoreError> {
    let body = serde_json::to_value(record)?;
    store.set_document(SENSOR_COLLECTION, SENSOR_DOC_KEY, &body)
}

/// Reads the latest sensor reading, `None` if nothing was ever ingested.
pub fn load_latest_reading(store: &dyn DocumentStore) -> Result<Option<SensorRecord>, StoreError> {
    match store.get_document(SENSOR_COLLECTION, SENSOR_DOC_KEY)? {
        Some(body) => Ok(Some(serde_json::from_value(body)?)),
        None => Ok(None),
    }
}

/// Overwrites the registered delivery token.
pub fn save_token(store: &dyn DocumentStore, token: &str) -> Result<(), StoreError> {
    let body = serde_json::to_value(TokenRecord { token: token.to_string() })?;
    store.set_document(TOKEN_COLLECTION, TOKEN_DOC_KEY, &body)
}

/// Reads the registered delivery token.
///
/// An empty stored token counts as "not registered".
pub fn load_token(store: &dyn DocumentStore) -> Result<Option<String>, StoreError> {
    match store.get_document(TOKEN_COLLECTION, TOKEN_DOC_KEY)? {
        Some(body) => {
            let record: TokenRecord = serde_json::from_value(body)?;
            Ok(Some(record.token).filter(|t| !t.is_empty()))
        }
        None => Ok(None),
    }
}
