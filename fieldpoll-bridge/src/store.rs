//! Device list persistence.
//!
//! The file is a JSON array of `{ id, registerStart, registerCount, name }`
//! records in polling order. Files written with the older
//! `regStart`/`regCount` keys load as well.

use std::path::{Path, PathBuf};

use fieldpoll_core::DeviceDescriptor;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

/// JSON file holding the device list.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the device list, keeping at most `capacity` entries.
    ///
    /// A missing file is an empty list.
    pub fn load(&self, capacity: usize) -> Result<Vec<DeviceDescriptor>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No device list on disk");
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let mut devices: Vec<DeviceDescriptor> =
            serde_json::from_str(&content).map_err(|e| BridgeError::Store {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        if devices.len() > capacity {
            warn!(
                path = %self.path.display(),
                stored = devices.len(),
                capacity,
                "Device list exceeds capacity, ignoring the tail"
            );
            devices.truncate(capacity);
        }

        info!(path = %self.path.display(), devices = devices.len(), "Device list loaded");
        Ok(devices)
    }

    /// Write the device list, replacing the file in one rename.
    pub fn save(&self, devices: &[DeviceDescriptor]) -> Result<()> {
        let content = serde_json::to_string_pretty(devices)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), devices = devices.len(), "Device list saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new(1, 0, 2, "greenhouse"),
            DeviceDescriptor::new(4, 10, 3, "cellar"),
        ]
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("devices.json"));
        assert!(store.load(16).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("devices.json"));

        store.save(&devices()).unwrap();

        assert_eq!(store.load(16).unwrap(), devices());
        assert!(!dir.path().join("devices.json.tmp").exists());
    }

    #[test]
    fn test_saved_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("devices.json"));
        store.save(&devices()[..1]).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                { "id": 1, "registerStart": 0, "registerCount": 2, "name": "greenhouse" }
            ])
        );
    }

    #[test]
    fn test_legacy_keys_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slaves.json");
        std::fs::write(
            &path,
            r#"[{"id":1,"regStart":0,"regCount":2,"name":"Sensor1"}]"#,
        )
        .unwrap();

        let devices = RegistryStore::new(&path).load(16).unwrap();
        assert_eq!(devices, vec![DeviceDescriptor::new(1, 0, 2, "Sensor1")]);
    }

    #[test]
    fn test_load_truncates_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("devices.json"));
        store.save(&devices()).unwrap();

        let loaded = store.load(1).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "greenhouse");
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = RegistryStore::new(&path).load(16);
        assert!(matches!(result, Err(BridgeError::Store { .. })));
    }
}
