//! The decoder seam shared by every wire format.

use crate::error::DecodeError;
use ais_core::VesselUpdate;
use chrono::{DateTime, Utc};

/// Turns one raw upstream message into at most one vessel update.
///
/// Decoders may keep state between calls (fragment buffers), hence
/// `&mut self`. `Ok(None)` means the message was accepted but carries
/// nothing to merge yet, e.g. the first half of a two-sentence group.
pub trait AisDecoder: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decode `raw`, received at `received_at`.
    ///
    /// `received_at` stands in for the message timestamp when the message
    /// does not carry one, and is "now" for ETA year reconstruction.
    fn decode(
        &mut self,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<VesselUpdate>, DecodeError>;
}
