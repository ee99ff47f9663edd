//! Per-device batch results.

use crate::decoder::{self, Reading};
use crate::device::DeviceDescriptor;
use crate::error::ProtocolError;

/// How one device's exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { readings: Vec<Reading> },
    ProtocolError { code: u8 },
    Timeout,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Result for one device, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceResult {
    pub id: u8,
    pub name: String,
    pub outcome: Outcome,
}

impl DeviceResult {
    pub fn success(device: &DeviceDescriptor, raw: &[u16]) -> Self {
        Self::tagged(
            device,
            Outcome::Success {
                readings: decoder::decode(raw),
            },
        )
    }

    pub fn protocol_error(device: &DeviceDescriptor, error: ProtocolError) -> Self {
        Self::tagged(device, Outcome::ProtocolError { code: error.code })
    }

    pub fn timeout(device: &DeviceDescriptor) -> Self {
        Self::tagged(device, Outcome::Timeout)
    }

    fn tagged(device: &DeviceDescriptor, outcome: Outcome) -> Self {
        Self {
            id: device.id,
            name: device.name.clone(),
            outcome,
        }
    }
}
