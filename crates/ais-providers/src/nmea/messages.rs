//! Field layouts of the supported AIS message types.

use super::payload::Payload;
use crate::error::DecodeError;
use ais_core::{Dimensions, EtaParts, Mmsi, Position, VesselFields, VesselUpdate};
use chrono::{DateTime, Utc};

const SOG_NOT_AVAILABLE: u64 = 1023;
const COG_NOT_AVAILABLE: u64 = 3600;

/// Message types this decoder understands.
pub const SUPPORTED_TYPES: [u8; 8] = [1, 2, 3, 5, 18, 19, 24, 27];

/// Project a complete payload onto a vessel update.
///
/// `timestamp` becomes the update time; `now` anchors ETA year
/// reconstruction.
pub fn project(
    payload: &Payload,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<VesselUpdate, DecodeError> {
    let message_type = payload.uint(0, 6) as u8;
    if !SUPPORTED_TYPES.contains(&message_type) {
        return Err(DecodeError::UnsupportedType(message_type));
    }
    require(payload, message_type, 38)?;

    let mmsi = Mmsi::new(payload.uint(8, 30))?;
    let mut update = VesselUpdate::new(mmsi, timestamp);
    let fields = &mut update.fields;
    fields.message_type = Some(message_type);

    match message_type {
        1..=3 => class_a_position(payload, message_type, fields)?,
        5 => static_and_voyage(payload, fields, now)?,
        18 => class_b_position(payload, message_type, fields)?,
        19 => extended_class_b(payload, fields)?,
        24 => static_data_report(payload, fields)?,
        27 => long_range(payload, fields)?,
        _ => return Err(DecodeError::UnsupportedType(message_type)),
    }
    Ok(update)
}

fn require(payload: &Payload, message_type: u8, bits: usize) -> Result<(), DecodeError> {
    if payload.len() < bits {
        return Err(DecodeError::TooShort {
            message_type,
            bits: payload.len(),
        });
    }
    Ok(())
}

fn position(
    payload: &Payload,
    lon_at: usize,
    lon_bits: usize,
    lat_bits: usize,
    scale: f64,
) -> Option<Position> {
    let lon = payload.int(lon_at, lon_bits) as f64 / scale;
    let lat = payload.int(lon_at + lon_bits, lat_bits) as f64 / scale;
    Position::new(lon, lat)
}

fn sog(raw: u64) -> Option<f64> {
    (raw != SOG_NOT_AVAILABLE).then(|| raw as f64 / 10.0)
}

fn cog(raw: u64) -> Option<f64> {
    (raw < COG_NOT_AVAILABLE).then(|| raw as f64 / 10.0)
}

fn nonzero<T: From<u8> + PartialEq>(value: T) -> Option<T> {
    (value != T::from(0)).then_some(value)
}

fn dimensions(payload: &Payload, start: usize) -> Option<Dimensions> {
    let dims = Dimensions {
        to_bow: payload.uint(start, 9) as u16,
        to_stern: payload.uint(start + 9, 9) as u16,
        to_port: payload.uint(start + 18, 6) as u16,
        to_starboard: payload.uint(start + 24, 6) as u16,
    };
    (dims != Dimensions::default()).then_some(dims)
}

fn class_a_position(
    payload: &Payload,
    message_type: u8,
    fields: &mut VesselFields,
) -> Result<(), DecodeError> {
    require(payload, message_type, 137)?;
    fields.nav_status = Some(payload.uint(38, 4) as u8);
    fields.sog = sog(payload.uint(50, 10));
    fields.position = position(payload, 61, 28, 27, 600_000.0);
    fields.cog = cog(payload.uint(116, 12));
    fields.heading = Some(payload.uint(128, 9) as u16);
    Ok(())
}

fn static_and_voyage(
    payload: &Payload,
    fields: &mut VesselFields,
    now: DateTime<Utc>,
) -> Result<(), DecodeError> {
    require(payload, 5, 302)?;
    fields.imo = nonzero(payload.uint(40, 30) as u32);
    fields.callsign = payload.text(70, 7);
    fields.name = payload.text(112, 20);
    fields.ship_type = nonzero(payload.uint(232, 8) as u8);
    fields.dimensions = dimensions(payload, 240);
    fields.eta = EtaParts {
        year: None,
        month: payload.uint(274, 4) as u32,
        day: payload.uint(278, 5) as u32,
        hour: payload.uint(283, 5) as u32,
        minute: payload.uint(288, 6) as u32,
    }
    .resolve(now);
    fields.draught = nonzero(payload.uint(294, 8)).map(|d| d as f64 / 10.0);
    fields.destination = payload.text(302, 20);
    Ok(())
}

fn class_b_position(
    payload: &Payload,
    message_type: u8,
    fields: &mut VesselFields,
) -> Result<(), DecodeError> {
    require(payload, message_type, 133)?;
    fields.sog = sog(payload.uint(46, 10));
    fields.position = position(payload, 57, 28, 27, 600_000.0);
    fields.cog = cog(payload.uint(112, 12));
    fields.heading = Some(payload.uint(124, 9) as u16);
    Ok(())
}

fn extended_class_b(payload: &Payload, fields: &mut VesselFields) -> Result<(), DecodeError> {
    require(payload, 19, 301)?;
    class_b_position(payload, 19, fields)?;
    fields.name = payload.text(143, 20);
    fields.ship_type = nonzero(payload.uint(263, 8) as u8);
    fields.dimensions = dimensions(payload, 271);
    Ok(())
}

/// Type 24 arrives as two independent sentences: part A carries the name,
/// part B the type, callsign and dimensions.
fn static_data_report(payload: &Payload, fields: &mut VesselFields) -> Result<(), DecodeError> {
    require(payload, 24, 40)?;
    match payload.uint(38, 2) {
        0 => {
            require(payload, 24, 160)?;
            fields.name = payload.text(40, 20);
        }
        1 => {
            require(payload, 24, 162)?;
            fields.ship_type = nonzero(payload.uint(40, 8) as u8);
            fields.callsign = payload.text(90, 7);
            fields.dimensions = dimensions(payload, 132);
        }
        part => {
            return Err(DecodeError::Malformed(format!(
                "static data report part {part}"
            )))
        }
    }
    Ok(())
}

fn long_range(payload: &Payload, fields: &mut VesselFields) -> Result<(), DecodeError> {
    require(payload, 27, 94)?;
    fields.nav_status = Some(payload.uint(40, 4) as u8);
    fields.position = position(payload, 44, 18, 17, 600.0);
    let sog = payload.uint(79, 6);
    fields.sog = (sog != 63).then_some(sog as f64);
    let cog = payload.uint(85, 9);
    fields.cog = (cog != 511).then_some(cog as f64);
    Ok(())
}
