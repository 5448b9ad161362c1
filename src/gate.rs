//! Low-moisture notification gate.
//!
//! Decides, once per stored reading, whether a "moisture low" push should
//! go out. An alert fires only when all of these hold:
//!
//! 1. the scaled value is below the threshold,
//! 2. more than the cooldown has passed since the last delivered alert,
//! 3. no other delivery is in flight.
//!
//! The check and the in-flight claim happen under one lock. The claim is an
//! RAII `GatePermit`, so the flag is released on every exit path, including
//! a failed or panicking delivery. The cooldown clock only advances when a
//! delivery actually succeeds; a missing token or a provider failure leaves
//! the next low reading free to try again.

use crate::config::AlertConfig;
use crate::model::Notification;
use crate::push::PushDelivery;
use crate::store::{self, DocumentStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub threshold: f64,
    pub cooldown: Duration,
    pub title: String,
}

impl Default for GatePolicy {
    fn default() -> Self {
        (&AlertConfig::default()).into()
    }
}

impl From<&AlertConfig> for GatePolicy {
    fn from(config: &AlertConfig) -> Self {
        GatePolicy {
            threshold: config.threshold_percent,
            cooldown: Duration::minutes(config.cooldown_minutes),
            title: config.title.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of one gate evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Value at or above the threshold
    AboveThreshold,
    /// Last delivered alert is too recent
    CoolingDown,
    /// Another delivery has not finished yet
    InFlight,
    /// Gate opened but no delivery token is registered
    NoToken,
    /// Gate opened but the token could not be read
    TokenLookupFailed(String),
    /// Push accepted; carries the provider message id
    Delivered(String),
    /// Push failed
    DeliveryFailed(String),
}

impl GateOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, GateOutcome::Delivered(_))
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GateState {
    last_fired: Option<DateTime<Utc>>,
    in_flight: bool,
}

pub struct NotificationGate {
    policy: GatePolicy,
    state: Mutex<GateState>,
}

/// Exclusive right to deliver one alert. Dropping it clears the in-flight
/// flag.
pub struct GatePermit<'a> {
    gate: &'a NotificationGate,
    now: DateTime<Utc>,
}

impl GatePermit<'_> {
    /// Starts the cooldown window at the time the gate was opened.
    pub fn mark_delivered(&self) {
        self.gate.state().last_fired = Some(self.now);
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.state().in_flight = false;
    }
}

impl NotificationGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        // Nothing panics while the lock is held, but never let a poisoned
        // lock wedge the gate.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time of the last delivered alert, `None` if none yet.
    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.state().last_fired
    }

    pub fn is_in_flight(&self) -> bool {
        self.state().in_flight
    }

    /// Checks the fire predicate and claims the in-flight flag in one step.
    pub fn try_acquire(&self, value: f64, now: DateTime<Utc>) -> Result<GatePermit<'_>, GateOutcome> {
        let mut state = self.state();

        if value.is_nan() || value >= self.policy.threshold {
            return Err(GateOutcome::AboveThreshold);
        }
        if let Some(last) = state.last_fired {
            if now - last <= self.policy.cooldown {
                return Err(GateOutcome::CoolingDown);
            }
        }
        if state.in_flight {
            return Err(GateOutcome::InFlight);
        }

        state.in_flight = true;
        Ok(GatePermit { gate: self, now })
    }

    /// Runs one full evaluation: predicate, token lookup, delivery.
    ///
    /// Blocks for the duration of the delivery call.
    pub fn evaluate(
        &self,
        value: f64,
        now: DateTime<Utc>,
        documents: &dyn DocumentStore,
        push: &dyn PushDelivery,
    ) -> GateOutcome {
        let permit = match self.try_acquire(value, now) {
            Ok(permit) => permit,
            Err(skipped) => {
                log::debug!("alert gate closed for {:.1}%: {:?}", value, skipped);
                return skipped;
            }
        };

        let token = match store::load_token(documents) {
            Ok(Some(token)) => token,
            Ok(None) => {
                log::warn!("moisture at {:.1}% but no delivery token registered; alert skipped", value);
                return GateOutcome::NoToken;
            }
            Err(e) => {
                log::error!("failed to read delivery token: {}", e);
                return GateOutcome::TokenLookupFailed(e.to_string());
            }
        };

        let notification = Notification::moisture_low(&self.policy.title, value);
        match push.send(&notification, &token) {
            Ok(message_id) => {
                permit.mark_delivered();
                log::info!("successfully sent moisture alert ({:.1}%): {}", value, message_id);
                GateOutcome::Delivered(message_id)
            }
            Err(e) => {
                log::error!("error sending moisture alert: {}", e);
                GateOutcome::DeliveryFailed(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushError;
    use crate::store::MemoryDocumentStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};

    struct CountingPush {
        sent: AtomicUsize,
    }

    impl CountingPush {
        fn new() -> Self {
            Self { sent: AtomicUsize::new(0) }
        }
        fn count(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    impl PushDelivery for CountingPush {
        fn send(&self, _: &Notification, _: &str) -> Result<String, PushError> {
            let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("msg-{}", n))
        }
    }

    struct FailingPush;

    impl PushDelivery for FailingPush {
        fn send(&self, _: &Notification, _: &str) -> Result<String, PushError> {
            Err(PushError::Transport("connection reset".to_string()))
        }
    }

    struct PanickingPush;

    impl PushDelivery for PanickingPush {
        fn send(&self, _: &Notification, _: &str) -> Result<String, PushError> {
            panic!("provider client blew up");
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap()
    }

    fn with_token() -> MemoryDocumentStore {
        let documents = MemoryDocumentStore::new();
        store::save_token(&documents, "device-1").unwrap();
        documents
    }

    #[test]
    fn test_fires_once_per_cooldown_window() {
        let gate = NotificationGate::new(GatePolicy::default());
        let documents = with_token();
        let push = CountingPush::new();

        let mut fired_at = Vec::new();
        for minute in [0, 1, 29, 31] {
            let outcome = gate.evaluate(20.0, t0() + Duration::minutes(minute), &documents, &push);
            if outcome.is_delivered() {
                fired_at.push(minute);
            }
        }

        assert_eq!(fired_at, vec![0, 31]);
        assert_eq!(push.count(), 2);
    }

    #[test]
    fn test_exactly_cooldown_is_still_cooling() {
        let gate = NotificationGate::new(GatePolicy::default());
        let documents = with_token();
        let push = CountingPush::new();

        assert!(gate.evaluate(10.0, t0(), &documents, &push).is_delivered());
        assert_eq!(
            gate.evaluate(10.0, t0() + Duration::minutes(30), &documents, &push),
            GateOutcome::CoolingDown
        );
    }

    #[test]
    fn test_does_not_fire_at_or_above_threshold() {
        let gate = NotificationGate::new(GatePolicy::default());
        let documents = with_token();
        let push = CountingPush::new();

        assert_eq!(gate.evaluate(50.0, t0(), &documents, &push), GateOutcome::AboveThreshold);
        assert_eq!(gate.evaluate(87.3, t0(), &documents, &push), GateOutcome::AboveThreshold);
        assert_eq!(gate.evaluate(f64::NAN, t0(), &documents, &push), GateOutcome::AboveThreshold);
        assert_eq!(push.count(), 0);
        assert_eq!(gate.last_fired(), None);
    }

    #[test]
    fn test_missing_token_does_not_consume_cooldown() {
        let gate = NotificationGate::new(GatePolicy::default());
        let documents = MemoryDocumentStore::new();
        let push = CountingPush::new();

        assert_eq!(gate.evaluate(30.0, t0(), &documents, &push), GateOutcome::NoToken);
        assert_eq!(gate.last_fired(), None);
        assert!(!gate.is_in_flight());

        store::save_token(&documents, "late-token").unwrap();
        let outcome = gate.evaluate(30.0, t0() + Duration::minutes(1), &documents, &push);

        assert!(outcome.is_delivered());
        assert_eq!(gate.last_fired(), Some(t0() + Duration::minutes(1)));
    }

    #[test]
    fn test_delivery_failure_releases_guard_and_keeps_window_open() {
        let gate = NotificationGate::new(GatePolicy::default());
        let documents = with_token();

        let outcome = gate.evaluate(5.0, t0(), &documents, &FailingPush);
        assert!(matches!(outcome, GateOutcome::DeliveryFailed(_)));
        assert!(!gate.is_in_flight());
        assert_eq!(gate.last_fired(), None);

        let push = CountingPush::new();
        assert!(gate.evaluate(5.0, t0() + Duration::seconds(5), &documents, &push).is_delivered());
    }

    #[test]
    fn test_panicking_delivery_releases_guard() {
        let gate = NotificationGate::new(GatePolicy::default());
        let documents = with_token();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            gate.evaluate(5.0, t0(), &documents, &PanickingPush)
        }));

        assert!(result.is_err());
        assert!(!gate.is_in_flight());
    }

    #[test]
    fn test_in_flight_blocks_second_evaluation() {
        let gate = NotificationGate::new(GatePolicy::default());

        let permit = gate.try_acquire(10.0, t0()).expect("gate should open");
        assert!(gate.is_in_flight());
        assert!(matches!(gate.try_acquire(10.0, t0()), Err(GateOutcome::InFlight)));

        drop(permit);
        assert!(!gate.is_in_flight());
        assert!(gate.try_acquire(10.0, t0()).is_ok());
    }

    /// Blocks inside `send` until the test releases it.
    struct BlockingPush {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        sent: AtomicUsize,
    }

    impl PushDelivery for BlockingPush {
        fn send(&self, _: &Notification, _: &str) -> Result<String, PushError> {
            self.started.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok("slow".to_string())
        }
    }

    #[test]
    fn test_overlapping_evaluations_send_once() {
        let gate = Arc::new(NotificationGate::new(GatePolicy::default()));
        let documents = Arc::new(with_token());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let push = Arc::new(BlockingPush {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
            sent: AtomicUsize::new(0),
        });

        let first = {
            let (gate, documents, push) = (gate.clone(), documents.clone(), push.clone());
            std::thread::spawn(move || gate.evaluate(10.0, t0(), documents.as_ref(), push.as_ref()))
        };

        started_rx.recv().unwrap();

        // A second low reading arrives while the first delivery is pending.
        let second = gate.evaluate(9.0, t0() + Duration::seconds(2), documents.as_ref(), push.as_ref());
        assert_eq!(second, GateOutcome::InFlight);

        release_tx.send(()).unwrap();
        assert!(first.join().unwrap().is_delivered());
        assert_eq!(push.sent.load(Ordering::SeqCst), 1);
        assert!(!gate.is_in_flight());
    }
}
