//! Stream-provider JSON envelopes (aisstream.io and compatible feeds).
//!
//! Every frame names its body with a `MessageType` discriminator and carries
//! provider `MetaData` (identifier, position, UTC time) alongside the decoded
//! AIS fields:
//!
//! ```json
//! {
//!   "MessageType": "PositionReport",
//!   "MetaData": { "MMSI": 259000420, "latitude": 66.02695, "longitude": 12.25382,
//!                 "time_utc": "2022-12-29 18:22:32.318353 +0000 UTC" },
//!   "Message": { "PositionReport": { "UserID": 259000420, "Sog": 0.0, "Cog": 308.0,
//!                "TrueHeading": 235, "NavigationalStatus": 15 } }
//! }
//! ```

use crate::decoder::AisDecoder;
use crate::error::DecodeError;
use ais_core::{
    BoundingBox, Dimensions, EtaParts, Mmsi, Position, VesselFields, VesselUpdate,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Subscription
// ============================================================================

/// First frame sent after the WebSocket opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionFrame {
    #[serde(rename = "APIKey")]
    pub api_key: String,

    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<BoundingBox>,

    #[serde(rename = "FilterMessageTypes", skip_serializing_if = "Vec::is_empty")]
    pub filter_message_types: Vec<String>,
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "MessageType", default)]
    message_type: Option<String>,

    #[serde(rename = "MetaData", default)]
    metadata: Option<MetaData>,

    #[serde(rename = "Message", default)]
    message: Map<String, Value>,

    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetaData {
    #[serde(rename = "MMSI", default)]
    mmsi: Option<u64>,

    #[serde(rename = "ShipName", default)]
    ship_name: Option<String>,

    #[serde(default)]
    latitude: Option<f64>,

    #[serde(default)]
    longitude: Option<f64>,

    #[serde(default)]
    time_utc: Option<String>,
}

impl MetaData {
    fn position(&self) -> Option<Position> {
        Position::new(self.longitude?, self.latitude?)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_time_utc(self.time_utc.as_deref()?)
    }
}

/// Parse `2022-12-29 18:22:32.318353 +0000 UTC`.
fn parse_time_utc(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_end_matches("UTC").trim_end();
    DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %z")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ============================================================================
// Message bodies
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionReport {
    #[serde(rename = "UserID", default)]
    pub user_id: Option<u64>,
    #[serde(rename = "MessageID", default)]
    pub message_id: Option<u8>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub cog: Option<f64>,
    #[serde(default)]
    pub sog: Option<f64>,
    #[serde(default)]
    pub true_heading: Option<u16>,
    #[serde(default)]
    pub navigational_status: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClassBPositionReport {
    #[serde(rename = "UserID", default)]
    pub user_id: Option<u64>,
    #[serde(rename = "MessageID", default)]
    pub message_id: Option<u8>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub cog: Option<f64>,
    #[serde(default)]
    pub sog: Option<f64>,
    #[serde(default)]
    pub true_heading: Option<u16>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ProviderDimension {
    #[serde(rename = "A", default)]
    pub a: u16,
    #[serde(rename = "B", default)]
    pub b: u16,
    #[serde(rename = "C", default)]
    pub c: u16,
    #[serde(rename = "D", default)]
    pub d: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProviderEta {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: Option<u32>,
}

impl ProviderEta {
    /// Missing or null components become the AIS "not available" markers.
    fn parts(&self) -> EtaParts {
        EtaParts {
            year: self.year,
            month: self.month.unwrap_or(0),
            day: self.day.unwrap_or(0),
            hour: self.hour.unwrap_or(24),
            minute: self.minute.unwrap_or(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShipStaticData {
    #[serde(rename = "UserID", default)]
    pub user_id: Option<u64>,
    #[serde(rename = "MessageID", default)]
    pub message_id: Option<u8>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub call_sign: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub imo_number: Option<u32>,
    #[serde(default)]
    pub maximum_static_draught: Option<f64>,
    #[serde(rename = "Type", default)]
    pub ship_type: Option<u8>,
    #[serde(default)]
    pub dimension: Option<ProviderDimension>,
    #[serde(default)]
    pub eta: Option<ProviderEta>,
}

/// Body of one provider frame, selected by `MessageType`.
#[derive(Debug, Clone, PartialEq)]
pub enum AisMessageBody {
    PositionReport(PositionReport),
    ClassBPositionReport(ClassBPositionReport),
    ShipStaticData(ShipStaticData),
    /// Any other message type, kept raw.
    Other(Value),
}

impl AisMessageBody {
    fn from_envelope(
        message_type: &str,
        message: &mut Map<String, Value>,
    ) -> Result<Self, DecodeError> {
        let body = message
            .remove(message_type)
            .filter(|body| !body.is_null())
            .unwrap_or_else(|| Value::Object(Map::new()));
        Ok(match message_type {
            "PositionReport" => Self::PositionReport(serde_json::from_value(body)?),
            "StandardClassBPositionReport" => {
                Self::ClassBPositionReport(serde_json::from_value(body)?)
            }
            "ShipStaticData" => Self::ShipStaticData(serde_json::from_value(body)?),
            _ => Self::Other(body),
        })
    }

    fn user_id(&self) -> Option<u64> {
        match self {
            Self::PositionReport(r) => r.user_id,
            Self::ClassBPositionReport(r) => r.user_id,
            Self::ShipStaticData(r) => r.user_id,
            Self::Other(raw) => raw.get("UserID").and_then(Value::as_u64),
        }
    }

    fn message_id(&self) -> Option<u8> {
        let id = match self {
            Self::PositionReport(r) => r.message_id,
            Self::ClassBPositionReport(r) => r.message_id,
            Self::ShipStaticData(r) => r.message_id,
            Self::Other(raw) => raw
                .get("MessageID")
                .and_then(Value::as_u64)
                .and_then(|id| u8::try_from(id).ok()),
        };
        id.filter(|&id| id != 0)
    }
}

/// Trim provider text: space and `@` padding, empty -> none.
fn clean_text(value: Option<&str>) -> Option<String> {
    let text = value?.trim_matches(|c: char| c == '@' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

fn position_or(
    lon: Option<f64>,
    lat: Option<f64>,
    fallback: Option<Position>,
) -> Option<Position> {
    match (lon, lat) {
        (Some(lon), Some(lat)) => Position::new(lon, lat).or(fallback),
        _ => fallback,
    }
}

/// Speed in knots; 102.3 is "not available".
fn speed(sog: Option<f64>) -> Option<f64> {
    sog.filter(|&sog| (0.0..102.3).contains(&sog))
}

/// Course in degrees; 360 is "not available".
fn course(cog: Option<f64>) -> Option<f64> {
    cog.filter(|&cog| (0.0..360.0).contains(&cog))
}

// ============================================================================
// Decoder
// ============================================================================

/// Stateless decoder for stream-provider JSON frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamDecoder;

impl StreamDecoder {
    pub fn new() -> Self {
        Self
    }

    fn project(body: &AisMessageBody, meta: &MetaData, now: DateTime<Utc>) -> VesselFields {
        let mut fields = VesselFields {
            message_type: body.message_id(),
            name: clean_text(meta.ship_name.as_deref()),
            ..VesselFields::default()
        };
        match body {
            AisMessageBody::PositionReport(r) => {
                fields.position = position_or(r.longitude, r.latitude, meta.position());
                fields.cog = course(r.cog);
                fields.sog = speed(r.sog);
                fields.heading = r.true_heading;
                fields.nav_status = r.navigational_status;
            }
            AisMessageBody::ClassBPositionReport(r) => {
                fields.position = position_or(r.longitude, r.latitude, meta.position());
                fields.cog = course(r.cog);
                fields.sog = speed(r.sog);
                fields.heading = r.true_heading;
            }
            AisMessageBody::ShipStaticData(r) => {
                if let Some(name) = clean_text(r.name.as_deref()) {
                    fields.name = Some(name);
                }
                fields.callsign = clean_text(r.call_sign.as_deref());
                fields.destination = clean_text(r.destination.as_deref());
                fields.imo = r.imo_number.filter(|&imo| imo != 0);
                fields.draught = r.maximum_static_draught.filter(|&d| d > 0.0);
                fields.ship_type = r.ship_type.filter(|&t| t != 0);
                fields.dimensions = r
                    .dimension
                    .map(|d| Dimensions {
                        to_bow: d.a,
                        to_stern: d.b,
                        to_port: d.c,
                        to_starboard: d.d,
                    })
                    .filter(|d| *d != Dimensions::default());
                fields.eta = r.eta.and_then(|eta| eta.parts().resolve(now));
            }
            AisMessageBody::Other(_) => {
                fields.position = meta.position();
            }
        }
        fields
    }
}

impl AisDecoder for StreamDecoder {
    fn name(&self) -> &'static str {
        "aisstream"
    }

    fn decode(
        &mut self,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<VesselUpdate>, DecodeError> {
        let mut envelope: Envelope = serde_json::from_str(raw)?;
        if let Some(error) = envelope.error.take() {
            return Err(DecodeError::Provider(error));
        }
        let message_type = envelope
            .message_type
            .take()
            .ok_or_else(|| DecodeError::Provider("envelope without MessageType".into()))?;
        if message_type == "Error" {
            let detail = envelope
                .message
                .get("Error")
                .map(Value::to_string)
                .unwrap_or_else(|| "unspecified".into());
            return Err(DecodeError::Provider(detail));
        }

        let meta = envelope.metadata.take().unwrap_or_default();
        let body = AisMessageBody::from_envelope(&message_type, &mut envelope.message)?;
        let id = meta
            .mmsi
            .or_else(|| body.user_id())
            .ok_or(DecodeError::MissingIdentifier)?;
        let mmsi = Mmsi::new(id)?;

        let timestamp = meta.timestamp().unwrap_or(received_at);
        let mut update = VesselUpdate::new(mmsi, timestamp);
        update.fields = Self::project(&body, &meta, received_at);
        Ok(Some(update))
    }
}
