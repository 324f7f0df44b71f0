//! Wire messages exchanged between feeders and the backend.
//!
//! Every body is a JSON object. Field names follow the camelCase layout
//! already deployed on devices, so renames here are wire-breaking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence of a feeder as announced on its status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retained presence announcement, also used as the broker last will.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub software_version: String,
    pub status: Status,
}

impl PresenceMessage {
    pub fn online(software_version: impl Into<String>) -> Self {
        Self {
            software_version: software_version.into(),
            status: Status::Online,
        }
    }

    pub fn offline(software_version: impl Into<String>) -> Self {
        Self {
            software_version: software_version.into(),
            status: Status::Offline,
        }
    }
}

/// Request for a feeder to dispense `portions` portions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCommand {
    pub portions: u32,
}

impl FeedCommand {
    pub fn new(portions: u32) -> Self {
        Self { portions }
    }

    /// A command for zero portions is never valid on the wire.
    pub fn is_valid(&self) -> bool {
        self.portions > 0
    }
}

/// One completed feed as reported by a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLogMessage {
    pub portions: u32,
    /// Serialized as RFC 3339 in UTC.
    pub timestamp: DateTime<Utc>,
}

/// Batched feed-log body: `{"value": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLogBatch {
    pub value: Vec<FeedLogMessage>,
}

impl FeedLogBatch {
    pub fn new(value: Vec<FeedLogMessage>) -> Self {
        Self { value }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Any feed-log body a backend may receive.
///
/// Older devices publish one entry per message without the `value`
/// wrapper; both shapes normalise to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FeedLogPayload {
    Batch(FeedLogBatch),
    Single(FeedLogMessage),
}

impl FeedLogPayload {
    pub fn into_batch(self) -> FeedLogBatch {
        match self {
            FeedLogPayload::Batch(batch) => batch,
            FeedLogPayload::Single(entry) => FeedLogBatch::new(vec![entry]),
        }
    }
}

/// Rotation direction of the feeding actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn presence_uses_camel_case_fields() {
        let msg = PresenceMessage::offline("1.2.0");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "softwareVersion": "1.2.0", "status": "offline" })
        );
    }

    #[test]
    fn presence_rejects_unknown_status() {
        let result: Result<PresenceMessage, _> =
            serde_json::from_str(r#"{"softwareVersion":"dev","status":"sleeping"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn feed_command_zero_portions_is_invalid() {
        let cmd: FeedCommand = serde_json::from_str(r#"{"portions":0}"#).unwrap();
        assert!(!cmd.is_valid());
        assert!(FeedCommand::new(3).is_valid());
    }

    #[test]
    fn feed_log_batch_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let batch = FeedLogBatch::new(vec![FeedLogMessage { portions: 2, timestamp: ts }]);
        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(
            json,
            r#"{"value":[{"portions":2,"timestamp":"2024-03-01T08:30:00Z"}]}"#
        );
    }

    #[test]
    fn payload_accepts_legacy_single_entry() {
        let payload: FeedLogPayload =
            serde_json::from_str(r#"{"portions":1,"timestamp":"2024-03-01T08:30:00Z"}"#).unwrap();
        let batch = payload.into_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.value[0].portions, 1);
    }

    #[test]
    fn payload_accepts_batch() {
        let payload: FeedLogPayload = serde_json::from_str(
            r#"{"value":[{"portions":1,"timestamp":"2024-03-01T08:30:00Z"},{"portions":4,"timestamp":"2024-03-01T09:00:00+01:00"}]}"#,
        )
        .unwrap();
        let batch = payload.into_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.value[1].timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn payload_rejects_garbage() {
        let result: Result<FeedLogPayload, _> = serde_json::from_str(r#"{"portions":"two"}"#);
        assert!(result.is_err());
    }
}
