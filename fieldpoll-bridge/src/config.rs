//! Configuration for the fieldpoll bridge.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldpoll_core::{StationConfig, Timeouts};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serialization::Format;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Encoding of published reports
    #[serde(default)]
    pub serialization: Format,

    /// Serial bus settings
    pub bus: BusConfig,

    /// Batch cadence, timeouts and registry size
    #[serde(default)]
    pub polling: PollingConfig,

    /// Where the device list is persisted
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Report destination
    #[serde(default)]
    pub publish: PublishConfig,

    /// Management interface
    #[serde(default)]
    pub http: HttpConfig,
}

/// Zenoh connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// "client", "peer", or "router"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Endpoints to connect to
    #[serde(default)]
    pub connect: Vec<String>,

    /// Endpoints to listen on
    #[serde(default)]
    pub listen: Vec<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Serial bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// How to reach the bus
    pub connection: ConnectionConfig,

    /// Bound on a single register exchange, in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Pause after switching to a different device, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_response_timeout_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    50
}

/// Connection configuration (RTU or TCP gateway).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus RTU on a local serial port
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    /// Modbus TCP, typically an RS-485 gateway
    Tcp {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_modbus_port() -> u16 {
    502
}

/// Batch cadence, timeouts and registry capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Time between batch starts, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Per-device budget, in milliseconds
    #[serde(default = "default_device_timeout_ms")]
    pub device_timeout_ms: u64,

    /// Whole-batch budget, in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Host loop period, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Maximum number of devices
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_device_timeout_ms() -> u64 {
    3000
}

fn default_batch_timeout_ms() -> u64 {
    30000
}

fn default_tick_ms() -> u64 {
    10
}

fn default_capacity() -> usize {
    16
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            device_timeout_ms: default_device_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
            tick_ms: default_tick_ms(),
            capacity: default_capacity(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            device: Duration::from_millis(self.device_timeout_ms),
            batch: Duration::from_millis(self.batch_timeout_ms),
        }
    }
}

/// Device list persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// JSON file holding the device list
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("devices.json")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

/// Report destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Key expression reports are put on
    #[serde(default = "default_key_expr")]
    pub key_expr: String,

    /// Source name carried in every report
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_key_expr() -> String {
    "fieldpoll/report".to_string()
}

fn default_source() -> String {
    "fieldpoll".to_string()
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            key_expr: default_key_expr(),
            source: default_source(),
        }
    }
}

/// HTTP management interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_http_listen")]
    pub listen: String,
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            listen: default_http_listen(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let polling = &self.polling;

        if polling.capacity == 0 || polling.capacity > 247 {
            return Err(ConfigError::Validation(
                "polling.capacity must be 1-247".to_string(),
            ));
        }
        if polling.tick_ms == 0 || polling.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "polling.tick_ms and polling.interval_ms must be positive".to_string(),
            ));
        }
        if polling.device_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "polling.device_timeout_ms must be positive".to_string(),
            ));
        }
        if polling.batch_timeout_ms < polling.device_timeout_ms {
            return Err(ConfigError::Validation(format!(
                "polling.batch_timeout_ms ({}) must not be shorter than polling.device_timeout_ms ({})",
                polling.batch_timeout_ms, polling.device_timeout_ms
            )));
        }
        // A read may wait out its settle delay before the response timeout
        // starts to matter, so both must fit inside the device timeout.
        let read_budget = self
            .bus
            .response_timeout_ms
            .saturating_add(self.bus.settle_delay_ms);
        if read_budget > polling.device_timeout_ms {
            return Err(ConfigError::Validation(format!(
                "bus.response_timeout_ms + bus.settle_delay_ms ({}) must not exceed polling.device_timeout_ms ({})",
                read_budget, polling.device_timeout_ms
            )));
        }
        if self.publish.key_expr.is_empty() {
            return Err(ConfigError::Validation(
                "publish.key_expr cannot be empty".to_string(),
            ));
        }

        if let ConnectionConfig::Rtu {
            parity, stop_bits, ..
        } = &self.bus.connection
        {
            match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    )));
                }
            }
            if !matches!(stop_bits, 1 | 2) {
                return Err(ConfigError::Validation(format!(
                    "invalid stop_bits {} (use 1 or 2)",
                    stop_bits
                )));
            }
        }

        Ok(())
    }

    /// Constants for the polling station.
    pub fn station_config(&self) -> StationConfig {
        StationConfig {
            capacity: self.polling.capacity,
            timeouts: self.polling.timeouts(),
            settle_delay: Duration::from_millis(self.bus.settle_delay_ms),
        }
    }
}
