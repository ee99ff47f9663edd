//! One bus, its devices, and the batch running on it.

use std::time::{Duration, Instant};

use tracing::info;

use crate::device::DeviceDescriptor;
use crate::error::{RegistryError, ResetError, StartError};
use crate::executor::{DirectionControl, RegisterLink, TransactionExecutor};
use crate::registry::DeviceRegistry;
use crate::report::{self, Report};
use crate::scheduler::{Advance, Phase, Progress, Scheduler, Timeouts};

/// Constants a station is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationConfig {
    /// Maximum number of registered devices.
    pub capacity: usize,
    pub timeouts: Timeouts,
    /// Pause after re-addressing the bus.
    pub settle_delay: Duration,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            timeouts: Timeouts::default(),
            settle_delay: Duration::from_millis(50),
        }
    }
}

/// Owns the registry, the scheduler and the executor of one bus.
///
/// All registry edits go through the station, which rejects them with
/// [`RegistryError::BatchRunning`] while a batch is in progress.
pub struct Station<L, D> {
    registry: DeviceRegistry,
    scheduler: Scheduler,
    executor: TransactionExecutor<L, D>,
    last_report: Option<Report>,
}

impl<L: RegisterLink, D: DirectionControl> Station<L, D> {
    pub fn new(config: StationConfig, link: L, direction: D) -> Self {
        Self {
            registry: DeviceRegistry::new(config.capacity),
            scheduler: Scheduler::new(config.timeouts),
            executor: TransactionExecutor::new(link, direction, config.settle_delay),
            last_report: None,
        }
    }

    fn ensure_editable(&self) -> Result<(), RegistryError> {
        if self.scheduler.phase() == Phase::Running {
            return Err(RegistryError::BatchRunning);
        }
        Ok(())
    }

    pub fn add_device(&mut self, device: DeviceDescriptor) -> Result<(), RegistryError> {
        self.ensure_editable()?;
        self.registry.add(device)
    }

    pub fn remove_device(&mut self, id: u8) -> Result<DeviceDescriptor, RegistryError> {
        self.ensure_editable()?;
        self.registry.remove(id)
    }

    pub fn replace_devices(&mut self, devices: Vec<DeviceDescriptor>) -> Result<(), RegistryError> {
        self.ensure_editable()?;
        self.registry.replace_all(devices)
    }

    /// Registered devices in polling order.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.registry.list()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn start_batch(&mut self, now: Instant) -> Result<usize, StartError> {
        self.scheduler.start_batch(&self.registry, now)
    }

    pub fn advance(&mut self, now: Instant) -> Advance {
        self.scheduler.advance(&mut self.executor, now)
    }

    pub fn cancel(&mut self) -> bool {
        self.scheduler.cancel(&mut self.executor)
    }

    /// Render a finished batch, keep it as the last report, and reset.
    ///
    /// Returns `None` unless the scheduler is in a terminal phase, so every
    /// terminal batch yields exactly one report.
    pub fn conclude(&mut self) -> Option<Report> {
        let phase = self.scheduler.phase();
        if !phase.is_terminal() {
            return None;
        }

        let report = report::render(phase, self.scheduler.results());
        info!(
            status = ?report.status,
            devices = report.devices.len(),
            "Batch concluded"
        );
        self.last_report = Some(report.clone());
        self.scheduler.reset().ok()?;
        Some(report)
    }

    pub fn reset(&mut self) -> Result<(), ResetError> {
        self.scheduler.reset()
    }

    pub fn phase(&self) -> Phase {
        self.scheduler.phase()
    }

    pub fn progress(&self) -> Progress {
        self.scheduler.progress()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &TransactionExecutor<L, D> {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut TransactionExecutor<L, D> {
        &mut self.executor
    }

    pub fn last_report(&self) -> Option<&Report> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ReadRequest;
    use crate::error::ProtocolError;
    use crate::report::ReportStatus;

    struct EchoLink {
        pending: Option<Vec<u16>>,
    }

    impl RegisterLink for EchoLink {
        fn select(&mut self, _address: u8) {}

        fn send_read(&mut self, request: &ReadRequest) -> Result<(), ProtocolError> {
            self.pending = Some(vec![u16::from(request.address); request.count() as usize]);
            Ok(())
        }

        fn poll_response(&mut self) -> Option<Result<Vec<u16>, ProtocolError>> {
            self.pending.take().map(Ok)
        }
    }

    struct NoPin;

    impl DirectionControl for NoPin {
        fn set_transmit(&mut self, _enabled: bool) {}
    }

    fn station() -> Station<EchoLink, NoPin> {
        let mut station = Station::new(
            StationConfig::default(),
            EchoLink { pending: None },
            NoPin,
        );
        station
            .add_device(DeviceDescriptor::new(1, 0, 2, "north"))
            .unwrap();
        station
            .add_device(DeviceDescriptor::new(2, 0, 1, "south"))
            .unwrap();
        station
    }

    #[test]
    fn test_edits_rejected_while_running() {
        let mut station = station();
        let now = Instant::now();
        station.start_batch(now).unwrap();

        assert_eq!(
            station.add_device(DeviceDescriptor::new(3, 0, 2, "east")),
            Err(RegistryError::BatchRunning)
        );
        assert_eq!(station.remove_device(1), Err(RegistryError::BatchRunning));
        assert_eq!(
            station.replace_devices(Vec::new()),
            Err(RegistryError::BatchRunning)
        );
        assert_eq!(station.devices().len(), 2);
    }

    #[test]
    fn test_conclude_reports_once() {
        let mut station = station();
        let now = Instant::now();

        assert!(station.conclude().is_none());

        station.start_batch(now).unwrap();
        while station.advance(now) != Advance::Completed {}

        let report = station.conclude().unwrap();
        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.devices.len(), 2);
        assert_eq!(station.phase(), Phase::Idle);
        assert!(station.conclude().is_none());
        assert_eq!(station.last_report(), Some(&report));

        assert!(station.add_device(DeviceDescriptor::new(3, 0, 2, "east")).is_ok());
    }

    #[test]
    fn test_cancelled_batch_reports_failed() {
        let mut station = station();
        let now = Instant::now();
        station.start_batch(now).unwrap();
        station.advance(now);
        station.advance(now);

        assert!(station.cancel());
        let report = station.conclude().unwrap();
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.devices.len(), 1);
    }
}
