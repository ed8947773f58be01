//! Device commands sent over the cloud channel.

use serde_json::json;

/// Command to send to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Request a full state push.
    PushAll,
    /// Stop the current print.
    PrintStop,
    /// List installed application certificates.
    GetAppCertList,
    /// Caller-supplied payload, sent verbatim.
    Raw(String),
}

impl DeviceCommand {
    /// Convert command to JSON payload text.
    pub fn payload(&self) -> String {
        match self {
            DeviceCommand::PushAll => json!({
                "pushing": {
                    "sequence_id": "0",
                    "command": "pushall",
                    "version": 1,
                    "push_target": 1
                }
            })
            .to_string(),

            DeviceCommand::PrintStop => json!({
                "print": {
                    "command": "stop",
                    "sequence_id": "0"
                }
            })
            .to_string(),

            DeviceCommand::GetAppCertList => json!({
                "security": {
                    "sequence_id": "0",
                    "command": "get_app_cert_list"
                }
            })
            .to_string(),

            DeviceCommand::Raw(payload) => payload.clone(),
        }
    }

    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::PushAll => "pushall",
            DeviceCommand::PrintStop => "stop",
            DeviceCommand::GetAppCertList => "get_app_cert_list",
            DeviceCommand::Raw(_) => "raw",
        }
    }
}

/// MQTT topic a device publishes reports on.
pub fn report_topic(device_id: &str) -> String {
    format!("device/{device_id}/report")
}

/// MQTT topic a device accepts commands on.
pub fn request_topic(device_id: &str) -> String {
    format!("device/{device_id}/request")
}

/// Device id from a `device/<id>/<suffix>` topic.
pub fn device_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next()) {
        (Some("device"), Some(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Whether a payload reads as a stop acknowledgment: the device reports
/// idle, or echoes the stop command.
pub fn is_stop_ack(payload: &str) -> bool {
    payload.contains("IDLE") || payload.contains("\"command\":\"stop\"")
}
