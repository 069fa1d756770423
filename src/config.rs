//! Device configuration loaded from the SD card
//!
//! The file is a JSON object:
//!
//! ```json
//! {
//!   "wifi_ssid": "home",
//!   "wifi_password": "secret",
//!   "server_url": "https://dash.example.com",
//!   "api_key": "abc123",
//!   "device_id": "",
//!   "refresh_interval": 1800,
//!   "use_insecure_tls": true,
//!   "standalone_mode": false
//! }
//! ```
//!
//! The first four keys are required and must be non-empty strings. The rest
//! fall back to defaults when absent or of the wrong type.

use alloc::format;
use alloc::string::{String, ToString};
use core::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::{Storage, StorageError};

/// Location of the configuration file (8.3 name in the card's root)
pub const CONFIG_PATH: &str = "/TERMINAL.JSN";

/// Seconds between wakes when neither the file nor the server says otherwise
pub const DEFAULT_REFRESH_INTERVAL: u32 = 1800;

/// Firmware version reported to the server
pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why the configuration could not be loaded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SD card not ready")]
    StorageNotReady,
    #[error("Config file not found: {0}")]
    FileNotFound(String),
    #[error("Failed to open config file: {0}")]
    OpenFailed(String),
    #[error("Config file is empty or unreadable")]
    EmptyOrUnreadable,
    #[error("JSON parse error")]
    ParseFailed,
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),
}

/// Validated device configuration, immutable once loaded
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub wifi_ssid: String,
    pub wifi_password: String,
    /// Base URL, e.g. `https://dash.example.com`
    pub server_url: String,
    pub api_key: String,
    /// Identifier sent as the `ID` header; defaults to the WiFi MAC
    pub device_id: String,
    /// Seconds between wakes
    pub refresh_interval: u32,
    /// Skip TLS certificate verification
    pub use_insecure_tls: bool,
    /// No launcher firmware to hand back to; Exit just restarts
    pub standalone_mode: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_password", &"<redacted>")
            .field("server_url", &self.server_url)
            .field("api_key", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("refresh_interval", &self.refresh_interval)
            .field("use_insecure_tls", &self.use_insecure_tls)
            .field("standalone_mode", &self.standalone_mode)
            .finish()
    }
}

/// Load and validate the configuration at `path`.
///
/// `mac` is only consulted when the file carries no device identifier and
/// every other check has passed.
pub fn load<S, M>(storage: &mut S, path: &str, mac: M) -> Result<Config, ConfigError>
where
    S: Storage + ?Sized,
    M: FnOnce() -> [u8; 6],
{
    if !storage.is_ready() {
        return Err(ConfigError::StorageNotReady);
    }

    let bytes = storage.read_file(path).map_err(|e| match e {
        StorageError::NotFound => ConfigError::FileNotFound(path.to_string()),
        StorageError::OpenFailed => ConfigError::OpenFailed(path.to_string()),
        StorageError::Empty | StorageError::ShortRead => ConfigError::EmptyOrUnreadable,
    })?;

    let doc: Value = serde_json::from_slice(&bytes).map_err(|e| {
        log::warn!("Config JSON error at line {} column {}", e.line(), e.column());
        ConfigError::ParseFailed
    })?;
    let obj = doc.as_object().ok_or(ConfigError::ParseFailed)?;

    let wifi_ssid = required(obj, "wifi_ssid")?;
    let wifi_password = required(obj, "wifi_password")?;
    let server_url = required(obj, "server_url")?;
    let api_key = required(obj, "api_key")?;

    let refresh_interval = obj
        .get("refresh_interval")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_REFRESH_INTERVAL);
    let use_insecure_tls = obj
        .get("use_insecure_tls")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let standalone_mode = obj
        .get("standalone_mode")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let device_id = match obj.get("device_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format_mac(&mac()),
    };

    let config = Config {
        wifi_ssid,
        wifi_password,
        server_url,
        api_key,
        device_id,
        refresh_interval,
        use_insecure_tls,
        standalone_mode,
    };
    log::info!("Config loaded: {:?}", config);
    Ok(config)
}

fn required(obj: &Map<String, Value>, key: &'static str) -> Result<String, ConfigError> {
    match obj.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ConfigError::MissingRequiredField(key)),
    }
}

/// Format a MAC address as `AA:BB:CC:DD:EE:FF`
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
