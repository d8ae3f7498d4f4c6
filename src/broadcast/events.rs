//! Events pushed to workspace subscribers

use crate::domain::{EquipmentStatusPage, Measurement};
use crate::errors::{Result, SourceplaneError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ConnectionAck,
    EquipmentStatusUpdate,
    MeasurementUpdate,
    SpecViolationAlarm,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionAck => "connection-ack",
            Self::EquipmentStatusUpdate => "equipment-status-update",
            Self::MeasurementUpdate => "measurement-update",
            Self::SpecViolationAlarm => "spec-violation-alarm",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message delivered to every subscriber of a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub workspace_id: String,
    pub payload: Value,
    pub generated_at: DateTime<Utc>,
}

impl HubEvent {
    pub fn new(kind: EventKind, workspace_id: impl Into<String>, payload: Value) -> Self {
        Self { kind, workspace_id: workspace_id.into(), payload, generated_at: Utc::now() }
    }

    /// Confirmation sent to a subscriber right after it registers
    pub fn connection_ack(workspace_id: &str, subscriber_id: &str) -> Self {
        Self::new(
            EventKind::ConnectionAck,
            workspace_id,
            json!({ "subscriber_id": subscriber_id, "message": "subscribed" }),
        )
    }

    pub fn equipment_status_update(workspace_id: &str, page: &EquipmentStatusPage) -> Self {
        Self::new(
            EventKind::EquipmentStatusUpdate,
            workspace_id,
            json!({ "items": page.items, "total": page.total }),
        )
    }

    pub fn measurement_update(workspace_id: &str, measurements: &[Measurement]) -> Self {
        Self::new(EventKind::MeasurementUpdate, workspace_id, json!({ "items": measurements }))
    }

    /// Alarm for one measurement outside its spec limits
    pub fn spec_violation_alarm(workspace_id: &str, measurement: &Measurement) -> Self {
        Self::new(
            EventKind::SpecViolationAlarm,
            workspace_id,
            json!({
                "equipment_id": measurement.equipment_id,
                "metric": measurement.metric,
                "value": measurement.value,
                "lsl": measurement.lsl,
                "usl": measurement.usl,
                "measured_at": measurement.measured_at,
            }),
        )
    }

    /// Wire form for SSE/WebSocket transports
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SourceplaneError::Serialization {
            source: e,
            context: format!("Failed to serialize {} event", self.kind),
        })
    }
}
