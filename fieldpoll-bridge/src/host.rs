//! Host loop driving the polling station.
//!
//! Every tick the host does one of three things: start a batch when one is
//! due, advance the running batch by one step, or conclude a finished batch
//! and hand its report on. The station lock is only taken inside a tick and
//! never across an `.await`.

use std::time::{Duration, Instant};

use fieldpoll_core::{Phase, Report, StartError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::SharedStation;

/// Drives one station at a fixed tick.
pub struct Host {
    station: SharedStation,
    interval: Duration,
    tick: Duration,
    next_start: Option<Instant>,
}

impl Host {
    /// `interval` is the time between batch starts, `tick` the loop period.
    pub fn new(station: SharedStation, interval: Duration, tick: Duration) -> Self {
        Self {
            station,
            interval,
            tick,
            next_start: None,
        }
    }

    /// One pass of the loop. Returns the report of a batch concluded here.
    pub fn step(&mut self, now: Instant) -> Option<Report> {
        let mut station = self.station.lock();

        match station.phase() {
            Phase::Idle => {
                if self.next_start.is_some_and(|due| now < due) {
                    return None;
                }
                if station.registry().is_empty() {
                    return None;
                }
                match station.start_batch(now) {
                    Ok(total) => {
                        debug!(devices = total, "Scheduled batch started");
                        self.next_start = Some(now + self.interval);
                    }
                    Err(StartError::NotIdle(_)) => {}
                    Err(e) => {
                        warn!(error = %e, "Could not start batch");
                        self.next_start = Some(now + self.interval);
                    }
                }
                None
            }
            Phase::Running => {
                station.advance(now);
                if station.phase().is_terminal() {
                    station.conclude()
                } else {
                    None
                }
            }
            Phase::Complete | Phase::Failed => station.conclude(),
        }
    }

    /// Run until shutdown, passing every concluded report to `on_report`.
    ///
    /// A batch still running at shutdown is cancelled.
    pub async fn run<F>(mut self, mut on_report: F, mut shutdown: watch::Receiver<bool>)
    where
        F: FnMut(Report) + Send,
    {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            tick_ms = self.tick.as_millis() as u64,
            "Polling loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(report) = self.step(Instant::now()) {
                        on_report(report);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.station.lock().cancel() {
            info!("Running batch cancelled");
        }
        info!("Polling loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BusStation;
    use crate::link::AdapterDirection;
    use fieldpoll_core::{DeviceDescriptor, ProtocolError, ReadRequest, RegisterLink, StationConfig};
    use std::sync::Arc;

    /// Answers every read immediately with the device address and a constant.
    struct EchoLink {
        address: u8,
        pending: bool,
    }

    impl RegisterLink for EchoLink {
        fn select(&mut self, address: u8) {
            self.address = address;
        }

        fn send_read(&mut self, _request: &ReadRequest) -> Result<(), ProtocolError> {
            self.pending = true;
            Ok(())
        }

        fn poll_response(&mut self) -> Option<Result<Vec<u16>, ProtocolError>> {
            if std::mem::take(&mut self.pending) {
                Some(Ok(vec![u16::from(self.address) * 10, 500]))
            } else {
                None
            }
        }
    }

    fn make_station(devices: &[DeviceDescriptor]) -> SharedStation {
        let mut station: BusStation = BusStation::new(
            StationConfig::default(),
            Box::new(EchoLink {
                address: 0,
                pending: false,
            }),
            Box::new(AdapterDirection),
        );
        station.replace_devices(devices.to_vec()).unwrap();
        Arc::new(parking_lot::Mutex::new(station))
    }

    fn two_devices() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new(1, 0, 2, "greenhouse"),
            DeviceDescriptor::new(2, 0, 2, "cellar"),
        ]
    }

    /// Step until a report comes out, returning it and the steps taken.
    fn step_to_report(host: &mut Host, now: Instant) -> (Report, usize) {
        for steps in 1..100 {
            if let Some(report) = host.step(now) {
                return (report, steps);
            }
        }
        panic!("no report after 100 steps");
    }

    #[test]
    fn test_empty_registry_never_starts() {
        let station = make_station(&[]);
        let mut host = Host::new(station.clone(), Duration::from_secs(1), Duration::from_millis(10));

        assert!(host.step(Instant::now()).is_none());
        assert_eq!(station.lock().phase(), Phase::Idle);
    }

    #[test]
    fn test_batch_runs_to_report() {
        let station = make_station(&two_devices());
        let mut host = Host::new(station.clone(), Duration::from_secs(1), Duration::from_millis(10));

        let (report, steps) = step_to_report(&mut host, Instant::now());

        // start, two steps per device, completion
        assert_eq!(steps, 6);
        assert!(!report.is_partial());
        assert_eq!(report.devices.len(), 2);
        assert_eq!(station.lock().phase(), Phase::Idle);
        assert!(station.lock().last_report().is_some());
    }

    #[test]
    fn test_next_batch_waits_for_interval() {
        let station = make_station(&two_devices());
        let interval = Duration::from_secs(3);
        let mut host = Host::new(station.clone(), interval, Duration::from_millis(10));
        let t0 = Instant::now();

        step_to_report(&mut host, t0);

        assert!(host.step(t0 + Duration::from_secs(1)).is_none());
        assert_eq!(station.lock().phase(), Phase::Idle);

        assert!(host.step(t0 + interval).is_none());
        assert_eq!(station.lock().phase(), Phase::Running);
    }

    #[test]
    fn test_externally_started_batch_is_driven() {
        let station = make_station(&two_devices());
        let mut host = Host::new(station.clone(), Duration::from_secs(60), Duration::from_millis(10));
        let now = Instant::now();

        station.lock().start_batch(now).unwrap();

        let (report, _) = step_to_report(&mut host, now);
        assert_eq!(report.devices[1].name, "cellar");
    }

    #[tokio::test]
    async fn test_run_publishes_and_stops() {
        let station = make_station(&two_devices());
        let host = Host::new(station.clone(), Duration::from_secs(60), Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (report_tx, mut report_rx) = tokio::sync::mpsc::unbounded_channel();

        let task = tokio::spawn(host.run(
            move |report| {
                let _ = report_tx.send(report);
            },
            shutdown_rx,
        ));

        let report = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.devices.len(), 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(station.lock().phase(), Phase::Idle);
    }
}
