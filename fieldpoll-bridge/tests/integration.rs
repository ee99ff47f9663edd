//! Integration tests for fieldpoll-bridge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fieldpoll_bridge::config::{BridgeConfig, ConnectionConfig};
use fieldpoll_bridge::host::Host;
use fieldpoll_bridge::link::AdapterDirection;
use fieldpoll_bridge::publisher::ReportEnvelope;
use fieldpoll_bridge::serialization::{Format, encode};
use fieldpoll_bridge::store::RegistryStore;
use fieldpoll_bridge::{BusStation, SharedStation};
use fieldpoll_core::{DeviceDescriptor, Phase, ProtocolError, ReadRequest, RegisterLink};

/// Device 2 never answers; the others answer on the next poll.
#[derive(Default)]
struct PartialBus {
    address: u8,
    pending: bool,
}

impl RegisterLink for PartialBus {
    fn select(&mut self, address: u8) {
        self.address = address;
    }

    fn send_read(&mut self, _request: &ReadRequest) -> Result<(), ProtocolError> {
        self.pending = self.address != 2;
        Ok(())
    }

    fn poll_response(&mut self) -> Option<Result<Vec<u16>, ProtocolError>> {
        if std::mem::take(&mut self.pending) {
            Some(Ok(vec![0xFFF6, 455, 12]))
        } else {
            None
        }
    }
}

/// The shipped sample configuration parses and validates.
#[test]
fn test_sample_config_is_valid() {
    let config: BridgeConfig = json5::from_str(include_str!("../fieldpoll.json5")).unwrap();
    config.validate().unwrap();

    assert!(matches!(config.bus.connection, ConnectionConfig::Rtu { .. }));
    assert_eq!(config.station_config().capacity, 16);
    assert_eq!(config.station_config().timeouts.device, Duration::from_secs(3));
}

/// Devices saved on disk are polled in order, a silent device times out, and
/// the report encodes for subscribers.
#[test]
fn test_stored_devices_to_published_report() {
    let dir = tempfile::tempdir().unwrap();
    let config: BridgeConfig = json5::from_str(include_str!("../fieldpoll.json5")).unwrap();

    let store = RegistryStore::new(dir.path().join("devices.json"));
    store
        .save(&[
            DeviceDescriptor::new(1, 0, 3, "greenhouse"),
            DeviceDescriptor::new(2, 0, 2, "cellar"),
            DeviceDescriptor::new(3, 0, 2, "attic"),
        ])
        .unwrap();

    let mut station: BusStation = BusStation::new(
        config.station_config(),
        Box::new(PartialBus::default()),
        Box::new(AdapterDirection),
    );
    station
        .replace_devices(store.load(config.polling.capacity).unwrap())
        .unwrap();
    let station: SharedStation = Arc::new(parking_lot::Mutex::new(station));

    let mut host = Host::new(station.clone(), config.polling.interval(), config.polling.tick());
    let start = Instant::now();
    let mut now = start;
    let report = loop {
        if let Some(report) = host.step(now) {
            break report;
        }
        now += config.polling.tick();
        assert!(now - start < config.polling.timeouts().batch, "batch never concluded");
    };

    assert!(!report.is_partial());
    let names: Vec<_> = report.devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["greenhouse", "cellar", "attic"]);
    assert_eq!(report.devices[1].error.as_deref(), Some("timeout"));

    let temperature = report.devices[0].reading("temperature").unwrap().as_f64();
    assert!((temperature + 1.0).abs() < 1e-9);

    let envelope = ReportEnvelope::new("fieldpoll", &report);
    let value: serde_json::Value =
        serde_json::from_slice(&encode(&envelope, Format::Json).unwrap()).unwrap();
    assert_eq!(value["report"]["devices"][0]["readings"]["reg2"], 12);
    assert_eq!(value["report"]["devices"][2]["id"], 3);
    assert_eq!(station.lock().phase(), Phase::Idle);
}
