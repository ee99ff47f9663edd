//! Report and status publishing on Zenoh.

use std::sync::Arc;

use fieldpoll_core::Report;
use serde::Serialize;
use zenoh::bytes::Encoding;

use crate::error::{BridgeError, Result};
use crate::serialization::{Format, encode};

/// A report as it goes out on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEnvelope<'a> {
    /// Unix time in milliseconds when the batch concluded.
    pub timestamp: i64,
    pub source: &'a str,
    pub report: &'a Report,
}

impl<'a> ReportEnvelope<'a> {
    pub fn new(source: &'a str, report: &'a Report) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source,
            report,
        }
    }
}

/// Current Unix time in milliseconds.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Bridge status announced on `{key_expr}/@/status`.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub bridge: String,
    pub version: String,
    /// "running" or "offline"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<usize>,
}

impl BridgeStatus {
    pub fn running(bridge: impl Into<String>, devices: usize) -> Self {
        Self {
            bridge: bridge.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: "running".to_string(),
            devices: Some(devices),
        }
    }

    pub fn offline(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: "offline".to_string(),
            devices: None,
        }
    }
}

/// Publishes reports to one key expression.
#[derive(Clone, Debug)]
pub struct ReportPublisher {
    session: Arc<zenoh::Session>,
    key_expr: String,
    source: String,
    format: Format,
}

impl ReportPublisher {
    pub fn new(
        session: Arc<zenoh::Session>,
        key_expr: impl Into<String>,
        source: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            session,
            key_expr: key_expr.into(),
            source: source.into(),
            format,
        }
    }

    pub fn key_expr(&self) -> &str {
        &self.key_expr
    }

    pub fn status_key(&self) -> String {
        status_key(&self.key_expr)
    }

    /// Publish a concluded report.
    pub async fn publish(&self, report: &Report) -> Result<()> {
        let envelope = ReportEnvelope::new(&self.source, report);
        let payload = encode(&envelope, self.format)?;

        self.session
            .put(&self.key_expr, payload)
            .encoding(self.format.encoding())
            .await
            .map_err(|e| BridgeError::Publish {
                key: self.key_expr.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(
            key = %self.key_expr,
            devices = report.devices.len(),
            "Report published"
        );
        Ok(())
    }

    /// Publish the report without waiting for Zenoh; failures are logged.
    pub fn publish_detached(&self, report: Report) {
        let publisher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&report).await {
                tracing::warn!(error = %e, "Failed to publish report");
            }
        });
    }

    /// Publish the bridge status, always as JSON.
    pub async fn publish_status(&self, status: &BridgeStatus) -> Result<()> {
        let key = self.status_key();
        let payload = serde_json::to_vec(status)?;

        self.session
            .put(&key, payload)
            .encoding(Encoding::APPLICATION_JSON)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.clone(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

fn status_key(key_expr: &str) -> String {
    format!("{}/@/status", key_expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpoll_core::{DeviceDescriptor, DeviceResult, Phase, render};

    #[test]
    fn test_status_key() {
        assert_eq!(status_key("fieldpoll/report"), "fieldpoll/report/@/status");
    }

    #[test]
    fn test_envelope_shape() {
        let report = render(
            Phase::Complete,
            &[DeviceResult::success(
                &DeviceDescriptor::new(1, 0, 2, "greenhouse"),
                &[215, 530],
            )],
        );
        let envelope = ReportEnvelope::new("site-a", &report);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["source"], "site-a");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(value["report"]["status"], "complete");
        let temperature = value["report"]["devices"][0]["readings"]["temperature"]
            .as_f64()
            .unwrap();
        assert!((temperature - 21.5).abs() < 1e-9);
    }

    #[test]
    fn test_status_serialization() {
        let running = serde_json::to_value(BridgeStatus::running("fieldpoll", 3)).unwrap();
        assert_eq!(running["status"], "running");
        assert_eq!(running["devices"], 3);

        let offline = serde_json::to_value(BridgeStatus::offline("fieldpoll")).unwrap();
        assert_eq!(offline["status"], "offline");
        assert!(offline.get("devices").is_none());
    }
}
