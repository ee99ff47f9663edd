//! Aggregate report rendering.
//!
//! [`render`] is pure: it turns a finished batch into a typed [`Report`]
//! that serializes as
//!
//! ```json
//! {
//!   "status": "complete",
//!   "devices": [
//!     { "id": 1, "name": "greenhouse", "readings": { "temperature": 20.0, "humidity": 45.0 } },
//!     { "id": 2, "name": "cellar", "error": "timeout" },
//!     { "id": 3, "name": "attic", "error": "0xE2" }
//!   ]
//! }
//! ```
//!
//! Devices appear in polling order. A `failed` report is partial.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::decoder::{Reading, ReadingValue};
use crate::error::ProtocolError;
use crate::result::{DeviceResult, Outcome};
use crate::scheduler::Phase;

/// Error tag used for timed-out devices.
pub const TIMEOUT_TAG: &str = "timeout";

/// Whether the batch covered every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Complete,
    Failed,
}

/// Rendered batch report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub status: ReportStatus,
    pub devices: Vec<DeviceEntry>,
}

impl Report {
    /// True when some devices of the batch are missing.
    pub fn is_partial(&self) -> bool {
        self.status == ReportStatus::Failed
    }

    pub fn device(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.name == name)
    }
}

/// One device in the report: readings or an error tag, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEntry {
    pub id: u8,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readings: Option<Readings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceEntry {
    pub fn reading(&self, name: &str) -> Option<ReadingValue> {
        self.readings
            .as_ref()?
            .0
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value)
    }
}

/// Readings serialized as an object, keeping decoder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Readings(pub Vec<Reading>);

impl Serialize for Readings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for reading in &self.0 {
            map.serialize_entry(&reading.name, &reading.value)?;
        }
        map.end()
    }
}

impl From<&DeviceResult> for DeviceEntry {
    fn from(result: &DeviceResult) -> Self {
        let (readings, error) = match &result.outcome {
            Outcome::Success { readings } => (Some(Readings(readings.clone())), None),
            Outcome::ProtocolError { code } => (None, Some(ProtocolError::new(*code).tag())),
            Outcome::Timeout => (None, Some(TIMEOUT_TAG.to_string())),
        };

        Self {
            id: result.id,
            name: result.name.clone(),
            readings,
            error,
        }
    }
}

/// Render batch results. Anything but `Complete` renders as `failed`.
pub fn render(phase: Phase, results: &[DeviceResult]) -> Report {
    let status = match phase {
        Phase::Complete => ReportStatus::Complete,
        _ => ReportStatus::Failed,
    };

    Report {
        status,
        devices: results.iter().map(DeviceEntry::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use serde_json::json;

    fn results() -> Vec<DeviceResult> {
        vec![
            DeviceResult::success(&DeviceDescriptor::new(1, 0, 3, "greenhouse"), &[200, 450, 7]),
            DeviceResult::timeout(&DeviceDescriptor::new(2, 0, 2, "cellar")),
            DeviceResult::protocol_error(
                &DeviceDescriptor::new(3, 0, 2, "attic"),
                ProtocolError::RESPONSE_TIMED_OUT,
            ),
        ]
    }

    #[test]
    fn test_render_json_shape() {
        let report = render(Phase::Complete, &results());
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(
            value,
            json!({
                "status": "complete",
                "devices": [
                    { "id": 1, "name": "greenhouse", "readings": { "temperature": 20.0, "humidity": 45.0, "reg2": 7 } },
                    { "id": 2, "name": "cellar", "error": "timeout" },
                    { "id": 3, "name": "attic", "error": "0xE2" }
                ]
            })
        );
    }

    #[test]
    fn test_readings_keep_register_order() {
        let report = render(Phase::Complete, &results());
        let json = serde_json::to_string(&report).unwrap();

        let temperature = json.find("temperature").unwrap();
        let humidity = json.find("humidity").unwrap();
        let reg2 = json.find("reg2").unwrap();
        assert!(temperature < humidity && humidity < reg2);
    }

    #[test]
    fn test_failed_batch_is_partial() {
        let report = render(Phase::Failed, &results()[..1]);
        assert!(report.is_partial());
        assert_eq!(report.devices.len(), 1);
    }

    #[test]
    fn test_entry_lookup() {
        let report = render(Phase::Complete, &results());
        let entry = report.device("greenhouse").unwrap();
        assert_eq!(entry.reading("reg2"), Some(ReadingValue::Raw(7)));
        assert!(report.device("cellar").unwrap().readings.is_none());
    }
}
