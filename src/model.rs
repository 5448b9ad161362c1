//! Shared data types for the moisture bridge.
//!
//! Documents are stored under fixed collection/key pairs: there is exactly
//! one "latest" sensor record and one delivery token. Neither keeps history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Document locations
// ---------------------------------------------------------------------------

/// Collection holding the latest scaled sensor reading.
pub const SENSOR_COLLECTION: &str = "sensorData";
/// Fixed document key for the latest reading (overwritten every cycle).
pub const SENSOR_DOC_KEY: &str = "latest";

/// Collection holding the registered push delivery token.
pub const TOKEN_COLLECTION: &str = "tokens";
/// Fixed document key for the delivery token.
pub const TOKEN_DOC_KEY: &str = "deviceToken";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The persisted "latest" moisture reading.
///
/// `value` is the unrounded percentage produced by the scaler. It is not
/// clamped, so a raw reading outside the calibrated range yields a value
/// below 0 or above 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// The persisted push delivery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
}

/// A push notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    /// Builds the low-moisture alert for a scaled reading.
    pub fn moisture_low(title: &str, value: f64) -> Self {
        Notification {
            title: title.to_string(),
            body: format!("Moisture level is down to {:.1}%.", value),
        }
    }
}
