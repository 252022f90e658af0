//! AIS vessel data model.
//!
//! These types carry vessel state through the pipeline:
//! - `VesselUpdate` is what one decoded message contributes
//! - `VesselRecord` is the merged, durable state for one vessel
//! - `Mmsi` is the validated identifier both are keyed by

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default time-to-live for a vessel record.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Heading value AIS uses for "not available". Carried through unchanged.
pub const HEADING_NOT_AVAILABLE: u16 = 511;

/// Default record TTL as a chrono duration.
pub fn default_ttl() -> Duration {
    Duration::minutes(DEFAULT_TTL_MINUTES)
}

/// Errors produced when validating an MMSI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MmsiError {
    /// Not exactly nine ASCII digits.
    #[error("mmsi must be exactly 9 digits, got {0:?}")]
    Malformed(String),

    /// Zero or wider than nine digits.
    #[error("mmsi {0} is out of range")]
    OutOfRange(u64),
}

/// Maritime Mobile Service Identity.
///
/// Canonical form is nine decimal digits, zero padded, never all zeros.
/// Numeric identifiers taken from binary AIS payloads are padded, so
/// `2579999` and `"002579999"` are the same vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mmsi(u32);

impl Mmsi {
    /// Largest value that still fits in nine digits.
    pub const MAX: u32 = 999_999_999;

    /// Validate a numeric MMSI.
    pub fn new(value: u64) -> Result<Self, MmsiError> {
        if value == 0 || value > u64::from(Self::MAX) {
            return Err(MmsiError::OutOfRange(value));
        }
        Ok(Self(value as u32))
    }

    /// The numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl FromStr for Mmsi {
    type Err = MmsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MmsiError::Malformed(s.to_string()));
        }
        let value: u64 = s.parse().map_err(|_| MmsiError::Malformed(s.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<String> for Mmsi {
    type Error = MmsiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mmsi> for String {
    fn from(mmsi: Mmsi) -> Self {
        mmsi.to_string()
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:09}", self.0)
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    /// Build a position, rejecting AIS "not available" markers (lon 181,
    /// lat 91) and anything else outside the valid range.
    pub fn new(lon: f64, lat: f64) -> Option<Self> {
        let valid = lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat);
        valid.then_some(Self { lon, lat })
    }
}

/// Area given as two opposite corners, each `[lat, lon]`.
///
/// Matches the wire shape used by stream-provider subscriptions and by
/// real-time client filters: `[[lat1, lon1], [lat2, lon2]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [[f64; 2]; 2]);

impl BoundingBox {
    /// The whole globe.
    pub fn world() -> Self {
        Self([[-90.0, -180.0], [90.0, 180.0]])
    }

    /// Whether a position lies inside the box (edges included).
    pub fn contains(&self, position: &Position) -> bool {
        let [[lat1, lon1], [lat2, lon2]] = self.0;
        let (lat_min, lat_max) = (lat1.min(lat2), lat1.max(lat2));
        let (lon_min, lon_max) = (lon1.min(lon2), lon1.max(lon2));
        (lat_min..=lat_max).contains(&position.lat) && (lon_min..=lon_max).contains(&position.lon)
    }
}

/// Offsets from the position reference point to the hull, in metres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub to_bow: u16,
    pub to_stern: u16,
    pub to_port: u16,
    pub to_starboard: u16,
}

impl Dimensions {
    /// Overall length, when known.
    pub fn length(&self) -> Option<u32> {
        let length = u32::from(self.to_bow) + u32::from(self.to_stern);
        (length > 0).then_some(length)
    }

    /// Overall beam, when known.
    pub fn beam(&self) -> Option<u32> {
        let beam = u32::from(self.to_port) + u32::from(self.to_starboard);
        (beam > 0).then_some(beam)
    }
}

/// ETA as delivered on the wire, one component at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EtaParts {
    pub year: Option<i32>,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl EtaParts {
    /// Rebuild a full timestamp.
    ///
    /// A missing or zero year means "the current year at decode time". The
    /// AIS "not available" markers (month 0, day 0, hour 24, minute 60) and
    /// impossible dates yield `None` rather than a zero date.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.month == 0 || self.day == 0 || self.hour >= 24 || self.minute >= 60 {
            return None;
        }
        let year = match self.year {
            Some(year) if year != 0 => year,
            _ => now.year(),
        };
        let date = NaiveDate::from_ymd_opt(year, self.month, self.day)?;
        let time = date.and_hms_opt(self.hour, self.minute, 0)?;
        Some(Utc.from_utc_datetime(&time))
    }
}

/// Optional vessel attributes shared by updates and records.
///
/// `None` means "not carried", which is different from a zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselFields {
    /// AIS message type the values came from (1-27).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    /// Course over ground, degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cog: Option<f64>,

    /// Speed over ground, knots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sog: Option<f64>,

    /// True heading, degrees; 511 = not available.
    #[serde(rename = "hdg", default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imo: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Draught, metres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draught: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_type: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_status: Option<u8>,
}

fn overlay<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

impl VesselFields {
    /// Copy every field `incoming` carries; keep the rest.
    pub fn overlay(&mut self, incoming: &VesselFields) {
        overlay(&mut self.message_type, &incoming.message_type);
        overlay(&mut self.name, &incoming.name);
        overlay(&mut self.position, &incoming.position);
        overlay(&mut self.cog, &incoming.cog);
        overlay(&mut self.sog, &incoming.sog);
        overlay(&mut self.heading, &incoming.heading);
        overlay(&mut self.dimensions, &incoming.dimensions);
        overlay(&mut self.imo, &incoming.imo);
        overlay(&mut self.callsign, &incoming.callsign);
        overlay(&mut self.destination, &incoming.destination);
        overlay(&mut self.draught, &incoming.draught);
        overlay(&mut self.ship_type, &incoming.ship_type);
        overlay(&mut self.eta, &incoming.eta);
        overlay(&mut self.nav_status, &incoming.nav_status);
    }
}

/// What one decoded message says about one vessel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselUpdate {
    pub mmsi: Mmsi,

    /// Message time: tag block or provider metadata, receive time otherwise.
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub fields: VesselFields,
}

impl VesselUpdate {
    /// An update carrying nothing but identity and time.
    pub fn new(mmsi: Mmsi, timestamp: DateTime<Utc>) -> Self {
        Self {
            mmsi,
            timestamp,
            fields: VesselFields::default(),
        }
    }
}

/// Latest known state of one vessel.
///
/// Invariant: `expire_at == last_updated + ttl` for the TTL of the store
/// that produced the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselRecord {
    pub mmsi: Mmsi,

    #[serde(flatten)]
    pub fields: VesselFields,

    pub last_updated: DateTime<Utc>,

    pub expire_at: DateTime<Utc>,

    /// Connector that produced the latest update.
    pub source_tag: String,
}

impl VesselRecord {
    /// Create a record from the first update seen for a vessel.
    pub fn from_update(update: &VesselUpdate, source_tag: &str, ttl: Duration) -> Self {
        Self {
            mmsi: update.mmsi,
            fields: update.fields.clone(),
            last_updated: update.timestamp,
            expire_at: update.timestamp + ttl,
            source_tag: source_tag.to_string(),
        }
    }

    /// Merge an update in place.
    ///
    /// Carried fields overwrite, omitted fields are kept. Identity, source
    /// and timestamps always refresh, even when the update is older than
    /// the record: arrival order decides.
    pub fn apply(&mut self, update: &VesselUpdate, source_tag: &str, ttl: Duration) {
        self.mmsi = update.mmsi;
        self.fields.overlay(&update.fields);
        self.last_updated = update.timestamp;
        self.expire_at = update.timestamp + ttl;
        if self.source_tag != source_tag {
            self.source_tag = source_tag.to_string();
        }
    }

    /// Whether the record is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expire_at
    }
}
