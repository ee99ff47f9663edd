//! Ordered, capacity-bounded device registry.

use tracing::debug;

use crate::device::{DeviceDescriptor, ReadRequest};
use crate::error::RegistryError;

/// Ordered collection of devices with unique ids and names.
///
/// Iteration order is insertion order, and it is the order devices are
/// polled and reported in. Every entry carries the read request built when
/// it was added, so a registered device is always pollable.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<(DeviceDescriptor, ReadRequest)>,
    capacity: usize,
}

impl DeviceRegistry {
    /// Create an empty registry holding at most `capacity` devices.
    pub fn new(capacity: usize) -> Self {
        Self {
            devices: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a device at the end of the registry.
    ///
    /// Every check runs before the registry is touched, so a rejected add
    /// leaves it exactly as it was.
    pub fn add(&mut self, device: DeviceDescriptor) -> Result<(), RegistryError> {
        device.validate()?;
        let request = device.read_request()?;

        if self.iter().any(|d| d.id == device.id) {
            return Err(RegistryError::DuplicateId(device.id));
        }
        if self.iter().any(|d| d.name == device.name) {
            return Err(RegistryError::DuplicateName(device.name));
        }
        if self.devices.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded(self.capacity));
        }

        debug!(id = device.id, name = %device.name, "Device registered");
        self.devices.push((device, request));
        Ok(())
    }

    /// Remove a device by id, returning it.
    pub fn remove(&mut self, id: u8) -> Result<DeviceDescriptor, RegistryError> {
        let index = self
            .devices
            .iter()
            .position(|(d, _)| d.id == id)
            .ok_or(RegistryError::NotFound(id))?;

        let (removed, _) = self.devices.remove(index);
        debug!(id, name = %removed.name, "Device removed");
        Ok(removed)
    }

    /// Replace the whole device list.
    ///
    /// The new list is validated as a whole first; on error nothing changes.
    pub fn replace_all(&mut self, devices: Vec<DeviceDescriptor>) -> Result<(), RegistryError> {
        let mut staged = DeviceRegistry::new(self.capacity);
        for device in devices {
            staged.add(device)?;
        }
        self.devices = staged.devices;
        Ok(())
    }

    /// Snapshot of the devices in insertion order.
    pub fn list(&self) -> Vec<DeviceDescriptor> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter().map(|(device, _)| device)
    }

    /// Devices paired with their read requests, in polling order.
    pub fn entries(&self) -> impl Iterator<Item = (&DeviceDescriptor, ReadRequest)> {
        self.devices.iter().map(|(device, request)| (device, *request))
    }

    pub fn get(&self, id: u8) -> Option<&DeviceDescriptor> {
        self.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
