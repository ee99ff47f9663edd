//! Device descriptors and register read requests.

use std::num::NonZeroU16;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// A field device on the bus.
///
/// The serialized form is the persisted registry record:
/// `{ id, registerStart, registerCount, name }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Bus address, unique within the registry.
    pub id: u8,

    /// First register to read.
    #[serde(alias = "regStart")]
    pub register_start: u16,

    /// Number of registers to read (at least 1).
    #[serde(alias = "regCount")]
    pub register_count: u16,

    /// Unique name, used as the report key.
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(id: u8, register_start: u16, register_count: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            register_start,
            register_count,
            name: name.into(),
        }
    }

    /// Check the descriptor on its own, without looking at other devices.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !(1..=247).contains(&self.id) {
            return Err(RegistryError::InvalidAddress(self.id));
        }
        if self.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        self.read_request().map(|_| ())
    }

    /// Build the read request for this device.
    pub fn read_request(&self) -> Result<ReadRequest, RegistryError> {
        ReadRequest::new(self.id, self.register_start, self.register_count)
            .ok_or_else(|| RegistryError::ZeroRegisters(self.name.clone()))
    }
}

/// One register read: target address and a non-empty register range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadRequest {
    pub address: u8,
    pub register_start: u16,
    pub register_count: NonZeroU16,
}

impl ReadRequest {
    /// Returns `None` for a zero-register request.
    pub fn new(address: u8, register_start: u16, register_count: u16) -> Option<Self> {
        Some(Self {
            address,
            register_start,
            register_count: NonZeroU16::new(register_count)?,
        })
    }

    pub fn count(&self) -> u16 {
        self.register_count.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let device = DeviceDescriptor::new(3, 0, 2, "greenhouse");
        let json = serde_json::to_string(&device).unwrap();
        assert_eq!(
            json,
            r#"{"id":3,"registerStart":0,"registerCount":2,"name":"greenhouse"}"#
        );
    }

    #[test]
    fn test_descriptor_accepts_legacy_keys() {
        let json = r#"{"id":7,"regStart":1,"regCount":4,"name":"tank"}"#;
        let device: DeviceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(device, DeviceDescriptor::new(7, 1, 4, "tank"));
    }

    #[test]
    fn test_zero_register_request_is_rejected() {
        assert!(ReadRequest::new(1, 0, 0).is_none());

        let device = DeviceDescriptor::new(1, 0, 0, "empty");
        assert_eq!(
            device.validate(),
            Err(RegistryError::ZeroRegisters("empty".to_string()))
        );
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let device = DeviceDescriptor::new(1, 0, 2, "");
        assert_eq!(device.validate(), Err(RegistryError::EmptyName));
    }

    #[test]
    fn test_broadcast_address_is_rejected() {
        let device = DeviceDescriptor::new(0, 0, 2, "everyone");
        assert_eq!(device.validate(), Err(RegistryError::InvalidAddress(0)));
        assert!(DeviceDescriptor::new(248, 0, 2, "reserved").validate().is_err());
    }

    #[test]
    fn test_read_request_from_descriptor() {
        let request = DeviceDescriptor::new(9, 16, 3, "meter").read_request().unwrap();
        assert_eq!(request.address, 9);
        assert_eq!(request.register_start, 16);
        assert_eq!(request.count(), 3);
    }
}
