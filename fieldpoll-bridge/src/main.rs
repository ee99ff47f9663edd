//! Zenoh bridge for an RS-485 field bus.
//!
//! Polls the registered devices in batches and publishes each batch report
//! to Zenoh.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fieldpoll_bridge::config::BridgeConfig;
use fieldpoll_bridge::host::Host;
use fieldpoll_bridge::http::HttpServer;
use fieldpoll_bridge::link::{self, AdapterDirection, ModbusLink};
use fieldpoll_bridge::publisher::{BridgeStatus, ReportPublisher};
use fieldpoll_bridge::store::RegistryStore;
use fieldpoll_bridge::{BusStation, LoggingConfig, SharedStation, session};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Polls field devices on an RS-485 bus and publishes batch reports to Zenoh.
#[derive(Parser, Debug)]
#[command(name = "fieldpoll-bridge")]
#[command(about = "Polls field devices and publishes batch reports to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "fieldpoll.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    fieldpoll_bridge::init_tracing(&log_config).context("Failed to init tracing")?;

    info!("Starting fieldpoll-bridge");
    info!("Loaded configuration from {:?}", args.config);

    let session = Arc::new(
        session::connect(&config.zenoh)
            .await
            .context("Failed to connect to Zenoh")?,
    );

    let response_timeout = Duration::from_millis(config.bus.response_timeout_ms);
    let ctx = link::connect(&config.bus.connection, response_timeout)
        .await
        .with_context(|| format!("Failed to open bus {:?}", config.bus.connection))?;
    info!(connection = ?config.bus.connection, "Bus opened");

    let mut station: BusStation = BusStation::new(
        config.station_config(),
        Box::new(ModbusLink::new(ctx, &config.bus)),
        Box::new(AdapterDirection),
    );

    let store = Arc::new(RegistryStore::new(&config.registry.path));
    let devices = store
        .load(config.polling.capacity)
        .context("Failed to load device list")?;
    station
        .replace_devices(devices)
        .context("Device list rejected")?;
    let device_count = station.registry().len();
    let station: SharedStation = Arc::new(parking_lot::Mutex::new(station));

    let publisher = ReportPublisher::new(
        session.clone(),
        &config.publish.key_expr,
        &config.publish.source,
        config.serialization,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let host = Host::new(
        station.clone(),
        config.polling.interval(),
        config.polling.tick(),
    );
    let report_publisher = publisher.clone();
    let host_task = tokio::spawn(host.run(
        move |report| report_publisher.publish_detached(report),
        shutdown_rx.clone(),
    ));

    let http_task = if config.http.enabled {
        let listen_addr: SocketAddr = config
            .http
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
        let server = HttpServer::new(station.clone(), store.clone(), listen_addr);
        let http_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(http_shutdown).await {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    if let Err(e) = publisher
        .publish_status(&BridgeStatus::running(&config.publish.source, device_count))
        .await
    {
        warn!(error = %e, "Failed to publish bridge status");
    }

    info!(
        devices = device_count,
        key = %publisher.key_expr(),
        "fieldpoll-bridge running"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = host_task.await;
        if let Some(task) = http_task {
            let _ = task.await;
        }
    })
    .await;

    if let Err(e) = publisher
        .publish_status(&BridgeStatus::offline(&config.publish.source))
        .await
    {
        warn!(error = %e, "Failed to publish offline status");
    }

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("fieldpoll-bridge stopped");

    Ok(())
}
