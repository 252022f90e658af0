//! AIVDM/AIVDO sentence decoding.
//!
//! A raw line goes through four steps: tag blocks are stripped (a `c:`
//! parameter becomes the message time), the checksum and envelope are
//! verified, multi-sentence groups are reassembled, and the six-bit payload
//! is projected onto a `VesselUpdate` according to its message type.

pub mod fragments;
pub mod messages;
pub mod payload;
pub mod sentence;

use crate::decoder::AisDecoder;
use crate::error::DecodeError;
use ais_core::VesselUpdate;
use chrono::{DateTime, Utc};
use fragments::FragmentBuffer;
use payload::Payload;
use sentence::{strip_tag_blocks, Sentence};

/// Stateful decoder for one NMEA feed.
///
/// Fragment buffers are per instance, so every connector owns its own
/// decoder.
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    fragments: FragmentBuffer,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incomplete multi-sentence groups currently buffered.
    pub fn pending_fragments(&self) -> usize {
        self.fragments.pending()
    }
}

impl AisDecoder for NmeaDecoder {
    fn name(&self) -> &'static str {
        "nmea"
    }

    fn decode(
        &mut self,
        raw: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<VesselUpdate>, DecodeError> {
        let (tags, line) = strip_tag_blocks(raw.trim())?;
        let sentence = Sentence::parse(&line)?;
        let Some(assembled) = self.fragments.push(&sentence, tags)? else {
            return Ok(None);
        };

        let payload = Payload::from_armored(&assembled.payload, assembled.fill_bits)?;
        let timestamp = assembled.tags.timestamp.unwrap_or(received_at);
        messages::project(&payload, timestamp, received_at).map(Some)
    }
}
