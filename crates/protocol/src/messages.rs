//! Payload schemas for the actions the gateway answers.

use serde::{Deserialize, Serialize};

pub mod actions {
    pub const BOOT_NOTIFICATION: &str = "BootNotification";
    pub const HEARTBEAT: &str = "Heartbeat";
}

// ── BootNotification ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    /// Station description; an object in OCPP 2.0.1, a bare name from some
    /// firmwares.
    pub charging_station: serde_json::Value,
    pub reason: BootReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootReason {
    ApplicationReset,
    FirmwareUpdate,
    LocalReset,
    PowerUp,
    RemoteReset,
    ScheduledReset,
    Triggered,
    Unknown,
    Watchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    /// ISO-8601, UTC.
    pub current_time: String,
    /// Heartbeat interval in seconds.
    pub interval: u32,
    pub status: RegistrationStatus,
}

impl BootNotificationRequest {
    /// Human-readable station label for logs.
    pub fn station_label(&self) -> String {
        match &self.charging_station {
            serde_json::Value::String(name) => name.clone(),
            serde_json::Value::Object(map) => {
                let vendor = map.get("vendorName").and_then(|v| v.as_str());
                let model = map.get("model").and_then(|v| v.as_str());
                match (vendor, model) {
                    (Some(vendor), Some(model)) => format!("{vendor} {model}"),
                    (None, Some(model)) => model.to_string(),
                    (Some(vendor), None) => vendor.to_string(),
                    (None, None) => self.charging_station.to_string(),
                }
            },
            other => other.to_string(),
        }
    }
}

// ── Heartbeat ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: String,
}
