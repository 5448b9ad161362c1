//! Shared fakes for integration tests
#![allow(dead_code)]

use moisture_bridge::model::Notification;
use moisture_bridge::push::{PushDelivery, PushError};
use moisture_bridge::store::{DocumentStore, StoreError};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records every delivery; optionally sleeps inside `send` to hold the gate
/// open, and tracks the highest number of overlapping sends.
pub struct RecordingPush {
    delay: Duration,
    sent: Mutex<Vec<(Notification, String)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            sent: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn sent(&self) -> Vec<(Notification, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl PushDelivery for RecordingPush {
    fn send(&self, notification: &Notification, token: &str) -> Result<String, PushError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        let mut sent = self.sent.lock().unwrap();
        sent.push((notification.clone(), token.to_string()));
        let id = format!("projects/test/messages/{}", sent.len());

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(id)
    }
}

/// Every write fails; reads report an empty store.
pub struct ReadOnlyStore;

impl DocumentStore for ReadOnlyStore {
    fn set_document(&self, _: &str, _: &str, _: &Value) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("write quota exceeded".to_string()))
    }

    fn get_document(&self, _: &str, _: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }
}
