//! Zenoh bridge for an RS-485 field bus.
//!
//! Polls every registered device once per batch, one exchange at a time,
//! and publishes the aggregate report of each batch to Zenoh.
//!
//! - [`host`] - the tick loop driving the polling station
//! - [`link`] - Modbus RTU/TCP register link
//! - [`store`] - device list persistence
//! - [`publisher`] - report and status publishing
//! - [`http`] - management interface
//!
//! # Key Expressions
//!
//! ```text
//! <publish.key_expr>            batch reports
//! <publish.key_expr>/@/status   bridge status (running / offline)
//! ```

use std::sync::Arc;

use fieldpoll_core::{DirectionControl, RegisterLink, Station};

pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod link;
pub mod publisher;
pub mod serialization;
pub mod session;
pub mod store;

pub use config::{BridgeConfig, LogFormat, LoggingConfig};
pub use error::{BridgeError, Result};

/// The station type the bridge runs, with the bus behind trait objects.
pub type BusStation = Station<Box<dyn RegisterLink + Send>, Box<dyn DirectionControl + Send>>;

/// Station shared between the host loop and the HTTP handlers.
pub type SharedStation = Arc<parking_lot::Mutex<BusStation>>;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
