//! Error types for persistence, startup and broadcasting.

use ais_core::Mmsi;
use ais_protocol::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Durable store failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    #[error("bulk write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("record {mmsi} rejected: {reason}")]
    Rejected { mmsi: Mmsi, reason: String },
}

/// The durable store never answered before shutdown was requested.
#[derive(Debug, Error)]
#[error("durable store unavailable at startup after {attempts} attempts: {last_error}")]
pub struct StoreUnavailableAtStartup {
    pub attempts: u64,
    pub last_error: String,
}

/// Failures delivering events to real-time clients.
///
/// Per-client errors only drop that client; dispatch continues.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] CodecError),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("client {0} is gone")]
    ClientGone(uuid::Uuid),

    #[error("client {0} did not accept the event within {1:?}")]
    SendTimeout(uuid::Uuid, Duration),
}
