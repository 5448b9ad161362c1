//! Bridge configuration loader - parses bridge.toml
//!
//! Keeps the serial port, scaling calibration, alert policy and HTTP port
//! out of the code so a new sensor or board can be calibrated without
//! recompiling. Secrets (database URL, push credentials) never live in the
//! TOML file; they come from the environment (`.env` is loaded by `dotenv`).

use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "bridge.toml";

/// Longest accepted alert cooldown (one year)
pub const MAX_COOLDOWN_MINUTES: i64 = 365 * 24 * 60;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration loading or validation error
#[derive(Debug)]
pub enum ConfigError {
    /// The file exists but could not be read
    Unreadable(String, io::Error),
    /// The file is not valid TOML or has wrong types
    Malformed(String, toml::de::Error),
    /// A value is present but unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Unreadable(path, e) => {
                write!(f, "Failed to read {}: {}", path, e)
            }
            ConfigError::Malformed(path, e) => {
                write!(f, "Failed to parse {}: {}\n\n", path, e)?;
                write!(f, "  See bridge.toml.example for the expected layout.")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Configuration sections
// ---------------------------------------------------------------------------

/// Serial port the microcontroller is attached to
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    /// Read timeout; a timeout is not an error, the reader just tries again
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
        }
    }
}

/// Calibration of the raw ADC reading onto a percentage.
///
/// `min_raw` is the reading in water (100%), `max_raw` the reading in dry
/// air (0%).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScaleRange {
    pub min_raw: i64,
    pub max_raw: i64,
    pub min_scaled: f64,
    pub max_scaled: f64,
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self {
            min_raw: 400,
            max_raw: 4050,
            min_scaled: 0.0,
            max_scaled: 100.0,
        }
    }
}

/// Low-moisture alert policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alert when the scaled value is strictly below this percentage
    pub threshold_percent: f64,
    /// Minimum time between two delivered alerts
    pub cooldown_minutes: i64,
    /// Notification title
    pub title: String,
    /// Upper bound on a single push delivery call
    pub delivery_timeout_secs: u64,
    /// Worker threads running gate evaluations
    pub workers: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 50.0,
            cooldown_minutes: 30,
            title: "Moisture Alert".to_string(),
            delivery_timeout_secs: 10,
            workers: 2,
        }
    }
}

/// HTTP API listener
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Root configuration structure for TOML parsing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub scaling: ScaleRange,
    pub alert: AlertConfig,
    pub http: HttpConfig,
}

impl BridgeConfig {
    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(contents)
            .map_err(|e| ConfigError::Malformed(origin.to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scaling.min_raw == self.scaling.max_raw {
            return Err(ConfigError::Invalid(format!(
                "scaling.min_raw and scaling.max_raw are both {}; the raw range must not be empty",
                self.scaling.min_raw
            )));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be non-zero".to_string()));
        }
        if self.serial.path.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.path must not be empty".to_string()));
        }
        if self.alert.workers == 0 {
            return Err(ConfigError::Invalid("alert.workers must be at least 1".to_string()));
        }
        if self.alert.cooldown_minutes < 0 {
            return Err(ConfigError::Invalid("alert.cooldown_minutes must not be negative".to_string()));
        }
        if self.alert.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "alert.cooldown_minutes is {}; the maximum is {} (one year)",
                self.alert.cooldown_minutes, MAX_COOLDOWN_MINUTES
            )));
        }
        if self.alert.delivery_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "alert.delivery_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from `path`.
///
/// A missing file is not an error: every section falls back to its
/// defaults. An unreadable or malformed file is.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig, ConfigError> {
    let path = path.as_ref();
    let origin = path.display().to_string();

    match fs::read_to_string(path) {
        Ok(contents) => BridgeConfig::from_toml_str(&contents, &origin),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("{} not found, using built-in defaults", origin);
            let config = BridgeConfig::default();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(ConfigError::Unreadable(origin, e)),
    }
}

// ---------------------------------------------------------------------------
// Push credentials (environment)
// ---------------------------------------------------------------------------

/// Firebase Cloud Messaging credentials
#[derive(Debug, Clone)]
pub struct PushCredentials {
    pub project_id: String,
    pub access_token: String,
}

/// Reads `FCM_PROJECT_ID` and `FCM_ACCESS_TOKEN` (after loading `.env`).
///
/// Returns `None` unless both are set and non-empty.
pub fn push_credentials_from_env() -> Option<PushCredentials> {
    dotenv::dotenv().ok();

    let project_id = env::var("FCM_PROJECT_ID").ok().filter(|v| !v.trim().is_empty())?;
    let access_token = env::var("FCM_ACCESS_TOKEN").ok().filter(|v| !v.trim().is_empty())?;

    Some(PushCredentials { project_id, access_token })
}
