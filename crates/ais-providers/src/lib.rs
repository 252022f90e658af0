//! # ais-providers
//!
//! Upstream AIS sources for the hub.
//!
//! This crate provides:
//! - `NmeaDecoder`: AIVDM/AIVDO sentences with tag blocks and multi-fragment
//!   reassembly (message types 1, 2, 3, 5, 18, 19, 24, 27)
//! - `StreamDecoder`: JSON envelopes from a stream provider such as
//!   aisstream.io
//! - `SourceConnector`: the reconnecting run loop around an `Upstream`
//!   (raw TCP lines or a subscribed WebSocket)
//!
//! Every decoder turns one raw message into at most one `VesselUpdate`
//! through the `AisDecoder` trait, so connectors do not care which wire
//! format they carry.

pub mod aisstream;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod nmea;
pub mod sources;
pub mod tcp;
pub mod websocket;

pub use aisstream::{AisMessageBody, StreamDecoder, SubscriptionFrame};
pub use connector::{ConnectorState, ConnectorTimings, FrameStream, SourceConnector, Upstream};
pub use decoder::AisDecoder;
pub use error::{ConnectionError, DecodeError};
pub use nmea::NmeaDecoder;
pub use sources::AnySource;
pub use tcp::TcpUpstream;
pub use websocket::WebSocketUpstream;
