//! Error types for decoding and upstream connections.

use ais_core::MmsiError;
use thiserror::Error;

/// Why a single raw message was dropped.
///
/// Decode errors never stop a connector: the message is logged at debug,
/// counted, and the next one is read.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed sentence: {0}")]
    Malformed(String),

    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },

    #[error("invalid payload character {0:?}")]
    Armor(char),

    #[error("unsupported message type {0}")]
    UnsupportedType(u8),

    #[error("fragment reassembly failed: {0}")]
    Fragment(String),

    #[error("payload too short for message type {message_type}: {bits} bits")]
    TooShort { message_type: u8, bits: usize },

    #[error("invalid MMSI: {0}")]
    Mmsi(#[from] MmsiError),

    #[error("message carries no vessel identifier")]
    MissingIdentifier,

    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider reported an error: {0}")]
    Provider(String),
}

/// Why an upstream session ended or could not start.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("subscription handshake failed: {0}")]
    Handshake(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}
