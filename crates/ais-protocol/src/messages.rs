//! Protocol message types for WebSocket communication.
//!
//! This module defines all message types exchanged with real-time clients:
//! - Server → Client: Hello, Event (`vessel`, `snapshot`)
//! - Client → Server: Subscribe, Unsubscribe
//!
//! Messages are serialized as JSON over WebSocket text frames.

use ais_core::{BoundingBox, Position, VesselRecord};
use serde::{Deserialize, Serialize};

/// Event carrying one updated vessel record.
pub const EVENT_VESSEL: &str = "vessel";

/// Event carrying every live vessel, sent once after hello.
pub const EVENT_SNAPSHOT: &str = "snapshot";

// ============================================================================
// Hello Message (Server → Client on connect)
// ============================================================================

/// Hello message sent by server immediately on WebSocket connection.
///
/// # Example
/// ```json
/// {
///   "name": "ais-hub",
///   "version": "0.1.0",
///   "timestamp": "2024-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Server name identifier.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Current server timestamp in ISO 8601 format.
    pub timestamp: String,
}

impl HelloMessage {
    /// Create a new Hello message.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

// ============================================================================
// Events (Server → Client)
// ============================================================================

/// Named event with a JSON payload: `{"event": "vessel", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    pub data: serde_json::Value,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// A `snapshot` event for a set of records.
    pub fn snapshot<'a, I>(records: I) -> Result<Self, serde_json::Error>
    where
        I: IntoIterator<Item = &'a VesselRecord>,
    {
        let data = records
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(EVENT_SNAPSHOT, serde_json::Value::Array(data)))
    }
}

// ============================================================================
// Client Requests (Client → Server)
// ============================================================================

/// Restrict events to vessels inside the given areas.
///
/// ```json
/// { "subscribe": { "boundingBoxes": [[[57.0, 3.0], [72.0, 32.0]]] } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub subscribe: AreaSubscription,
}

/// Areas of interest for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaSubscription {
    #[serde(default)]
    pub bounding_boxes: Vec<BoundingBox>,
}

impl AreaSubscription {
    /// Whether a record with this position should reach the client.
    ///
    /// An empty subscription passes everything. Otherwise a record passes
    /// when its position is inside any box, or when it has no position at
    /// all, wherever the vessel actually is.
    pub fn matches(&self, position: Option<&Position>) -> bool {
        if self.bounding_boxes.is_empty() {
            return true;
        }
        match position {
            Some(position) => self.bounding_boxes.iter().any(|b| b.contains(position)),
            None => true,
        }
    }
}

/// Clear any area filter: `{"unsubscribe": {}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub unsubscribe: UnsubscribeSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsubscribeSpec {}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Hello message sent on connection.
    Hello(HelloMessage),

    /// Named event.
    Event(EventMessage),
}

/// Messages that can be received from client.
///
/// Uses untagged deserialization - the message type is determined by
/// examining which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ais_core::{Mmsi, VesselUpdate};

    #[test]
    fn test_hello_serialization() {
        let hello = HelloMessage::new("test-hub", "0.1.0");
        let json = serde_json::to_string(&hello).unwrap();

        assert!(json.contains("\"name\":\"test-hub\""));
        assert!(json.contains("\"version\":\"0.1.0\""));
        let mut fields: Vec<String> = serde_json::to_value(&hello)
            .unwrap()
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        fields.sort();
        assert_eq!(fields, vec!["name", "timestamp", "version"]);
    }

    #[test]
    fn test_vessel_event_shape() {
        let mmsi = Mmsi::new(257_123_450).unwrap();
        let mut update = VesselUpdate::new(mmsi, chrono::Utc::now());
        update.fields.heading = Some(511);
        let record = VesselRecord::from_update(&update, "tcp", ais_core::default_ttl());

        let event = EventMessage::new(EVENT_VESSEL, serde_json::to_value(&record).unwrap());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "vessel");
        assert_eq!(json["data"]["mmsi"], "257123450");
        assert_eq!(json["data"]["hdg"], 511);
    }

    #[test]
    fn test_subscribe_deserialization() {
        let json = r#"{ "subscribe": { "boundingBoxes": [[[57.0, 3.0], [72.0, 32.0]]] } }"#;

        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Subscribe(req) => {
                assert_eq!(req.subscribe.bounding_boxes.len(), 1);
            }
            _ => panic!("Expected Subscribe message"),
        }
    }

    #[test]
    fn test_unsubscribe_deserialization() {
        let msg: ClientMessage = serde_json::from_str(r#"{ "unsubscribe": {} }"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe(_)));
    }

    #[test]
    fn test_area_matching() {
        let area = AreaSubscription {
            bounding_boxes: vec![BoundingBox([[57.0, 3.0], [72.0, 32.0]])],
        };
        assert!(area.matches(Some(&Position { lon: 5.3, lat: 60.4 })));
        assert!(!area.matches(Some(&Position { lon: -70.0, lat: 40.0 })));
        assert!(area.matches(None));
        assert!(AreaSubscription::default().matches(Some(&Position { lon: -70.0, lat: 40.0 })));
    }
}
