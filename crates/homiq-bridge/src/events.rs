//! Observer events
//!
//! Everything that happens on the bridge is published as a [`BridgeEvent`]
//! on a broadcast channel. Publishing never waits for subscribers; a
//! subscriber that falls behind loses the oldest events.

use chrono::{DateTime, Utc};
use homiq_protocol::Frame;
use serde::Serialize;
use serde_json::Value;

use crate::connection::ConnectionId;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    /// A frame was received and parsed
    #[serde(rename_all = "camelCase")]
    FrameRx {
        /// Connection it arrived on
        connection: ConnectionId,
        /// Peer address
        remote_addr: String,
        /// Frame text as received
        frame: String,
        /// Decoded fields
        parsed: Frame,
        /// Checksum verdict
        valid: bool,
    },

    /// A frame was queued for a connection
    #[serde(rename_all = "camelCase")]
    FrameTx {
        /// Target connection
        connection: ConnectionId,
        /// Peer address
        remote_addr: String,
        /// Wire frame without terminator
        frame: String,
        /// Unsolicited push rather than a response
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        push: bool,
        /// Injected latency before the write
        #[serde(skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
    },

    /// A client connected
    #[serde(rename_all = "camelCase")]
    Connection {
        /// Assigned id
        id: ConnectionId,
        /// Peer address
        remote_addr: String,
    },

    /// A client went away
    #[serde(rename_all = "camelCase")]
    Disconnection {
        /// Connection id
        id: ConnectionId,
        /// Peer address
        remote_addr: String,
    },

    /// A device property changed
    #[serde(rename_all = "camelCase")]
    DeviceUpdate {
        /// Device address
        device_addr: String,
        /// Command or key written
        cmd: String,
        /// New value
        value: String,
    },

    /// A different scenario became active
    #[serde(rename_all = "camelCase")]
    ScenarioChange {
        /// Scenario name
        name: String,
        /// Number of push timers now running
        push_events: usize,
    },
}

impl EventKind {
    /// Event type name as published
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::FrameRx { .. } => "frame_rx",
            EventKind::FrameTx { .. } => "frame_tx",
            EventKind::Connection { .. } => "connection",
            EventKind::Disconnection { .. } => "disconnection",
            EventKind::DeviceUpdate { .. } => "device_update",
            EventKind::ScenarioChange { .. } => "scenario_change",
        }
    }
}

/// A timestamped event
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub kind: EventKind,
}

impl BridgeEvent {
    /// Stamp an event with the current time
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// `{type, timestamp, data}` object for external observers
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(&self.kind).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(
                "timestamp".to_string(),
                Value::String(self.timestamp.to_rfc3339()),
            );
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let event = BridgeEvent::now(EventKind::DeviceUpdate {
            device_addr: "05".into(),
            cmd: "O.3".into(),
            value: "1".into(),
        });
        let json = event.to_json();
        assert_eq!(json["type"], "device_update");
        assert_eq!(json["data"]["deviceAddr"], "05");
        assert_eq!(json["data"]["value"], "1");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_push_flag_only_when_set() {
        let tx = |push| {
            BridgeEvent::now(EventKind::FrameTx {
                connection: ConnectionId(1),
                remote_addr: "peer".into(),
                frame: "<;HB;1;0;0;1;a;32;>".into(),
                push,
                delay_ms: None,
            })
            .to_json()
        };
        assert_eq!(tx(true)["data"]["push"], true);
        assert!(tx(false)["data"].get("push").is_none());
        assert_eq!(tx(false)["data"]["connection"], "conn_1");
    }

    #[test]
    fn test_names_match_serialized_type() {
        let kind = EventKind::ScenarioChange {
            name: "Stress Test".into(),
            push_events: 1,
        };
        let json = BridgeEvent::now(kind.clone()).to_json();
        assert_eq!(json["type"], kind.name());
    }
}
