//! fieldpoll core
//!
//! Non-blocking polling of many devices sharing one half-duplex bus:
//!
//! - [`registry`] - ordered device list with unique ids and names
//! - [`executor`] - one register exchange at a time, with direction control
//! - [`decoder`] - fixed-point decoding of the sensor register layout
//! - [`scheduler`] - the cooperative batch state machine
//! - [`report`] - typed aggregate report of a finished batch
//! - [`station`] - owns the above for one bus and guards registry edits
//!
//! Nothing here blocks or reads a clock: the host passes the current time to
//! every [`Station::advance`] call.

pub mod decoder;
pub mod device;
pub mod error;
pub mod executor;
pub mod registry;
pub mod report;
pub mod result;
pub mod scheduler;
pub mod station;

pub use decoder::{Reading, ReadingValue, decode};
pub use device::{DeviceDescriptor, ReadRequest};
pub use error::{ProtocolError, RegistryError, ResetError, StartError};
pub use executor::{DirectionControl, RegisterLink, TransactionExecutor};
pub use registry::DeviceRegistry;
pub use report::{DeviceEntry, Report, ReportStatus, render};
pub use result::{DeviceResult, Outcome};
pub use scheduler::{Advance, Phase, Progress, Scheduler, Timeouts};
pub use station::{Station, StationConfig};
