//! Ingest loop: one cycle per line from the microcontroller.
//!
//! Per line:
//! 1. trim, pull out the first run of ASCII digits (anything else is boot
//!    chatter or noise and is dropped without comment)
//! 2. scale the raw value to a percentage
//! 3. overwrite the `sensorData/latest` document
//! 4. only if the write succeeded, hand `(value, now)` to the alert gate
//!
//! Gate evaluation runs inline or on a worker pool. With the pool, the next
//! line is read while a push is still in progress; the gate's in-flight
//! flag keeps deliveries from overlapping.

use crate::gate::{GateOutcome, NotificationGate};
use crate::model::SensorRecord;
use crate::push::PushDelivery;
use crate::scaler::Scaler;
use crate::store::{self, DocumentStore};
use chrono::{DateTime, Utc};
use std::io;
use std::sync::Arc;
use threadpool::ThreadPool;

/// Returns the first maximal run of ASCII digits in `line` as a number.
///
/// `None` when there is no digit run, or when the run does not fit in an
/// `i64` (a garbled line, not a reading).
pub fn extract_reading(line: &str) -> Option<i64> {
    let trimmed = line.trim();
    let start = trimmed.find(|c: char| c.is_ascii_digit())?;
    let rest = &trimmed[start..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

// ---------------------------------------------------------------------------
// Outcomes and counters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No reading on the line
    Discarded,
    /// Reading scaled but the store write failed; gate not consulted
    StoreFailed,
    /// Reading stored. `alert` is the gate result when evaluated inline,
    /// `None` when the evaluation was handed to the worker pool.
    Stored {
        raw: i64,
        value: f64,
        alert: Option<GateOutcome>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub discarded: u64,
    pub stored: u64,
    pub store_failures: u64,
    pub source_errors: u64,
}

enum Dispatch {
    Inline,
    Pool(ThreadPool),
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct IngestLoop {
    scaler: Scaler,
    documents: Arc<dyn DocumentStore>,
    gate: Arc<NotificationGate>,
    push: Arc<dyn PushDelivery>,
    dispatch: Dispatch,
    stats: IngestStats,
}

impl IngestLoop {
    /// Creates a loop that evaluates the gate inline.
    pub fn new(
        scaler: Scaler,
        documents: Arc<dyn DocumentStore>,
        gate: Arc<NotificationGate>,
        push: Arc<dyn PushDelivery>,
    ) -> Self {
        Self {
            scaler,
            documents,
            gate,
            push,
            dispatch: Dispatch::Inline,
            stats: IngestStats::default(),
        }
    }

    /// Moves gate evaluations onto a pool of `workers` threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.dispatch = Dispatch::Pool(ThreadPool::with_name("alert-gate".to_string(), workers.max(1)));
        self
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Runs one ingest cycle for a single line.
    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) -> CycleOutcome {
        self.stats.lines += 1;

        let raw = match extract_reading(line) {
            Some(raw) => raw,
            None => {
                self.stats.discarded += 1;
                log::debug!("skipping non-numeric line: {:?}", line.trim());
                return CycleOutcome::Discarded;
            }
        };

        let value = self.scaler.scale(raw);
        let record = SensorRecord { value, timestamp: now };

        if let Err(e) = store::save_latest_reading(self.documents.as_ref(), &record) {
            self.stats.store_failures += 1;
            log::error!("error saving sensor data (raw {}): {}", raw, e);
            return CycleOutcome::StoreFailed;
        }

        self.stats.stored += 1;
        log::info!("sensor data updated: scaled value {:.2}%, sensor value {}", value, raw);

        let alert = self.dispatch_gate(value, now);
        CycleOutcome::Stored { raw, value, alert }
    }

    fn dispatch_gate(&self, value: f64, now: DateTime<Utc>) -> Option<GateOutcome> {
        match &self.dispatch {
            Dispatch::Inline => Some(self.gate.evaluate(
                value,
                now,
                self.documents.as_ref(),
                self.push.as_ref(),
            )),
            Dispatch::Pool(pool) => {
                let gate = Arc::clone(&self.gate);
                let documents = Arc::clone(&self.documents);
                let push = Arc::clone(&self.push);
                pool.execute(move || {
                    gate.evaluate(value, now, documents.as_ref(), push.as_ref());
                });
                None
            }
        }
    }

    /// Consumes lines until the source ends.
    ///
    /// Source errors are logged and counted; the loop keeps reading.
    pub fn run<I>(&mut self, lines: I) -> IngestStats
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        for line in lines {
            match line {
                Ok(line) => {
                    self.process_line(&line, Utc::now());
                }
                Err(e) => {
                    self.stats.source_errors += 1;
                    log::error!("error with serial port: {}", e);
                }
            }
        }

        self.wait_for_alerts();
        log::info!("line source ended: {:?}", self.stats);
        self.stats.clone()
    }

    /// Blocks until every dispatched gate evaluation has finished.
    pub fn wait_for_alerts(&self) {
        if let Dispatch::Pool(pool) = &self.dispatch {
            pool.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
