//! Multi-sentence reassembly.

use super::sentence::{Sentence, TagBlock};
use crate::error::DecodeError;
use std::collections::HashMap;
use tracing::debug;

/// Partial groups kept before the oldest is evicted.
pub const MAX_PARTIAL_GROUPS: usize = 64;

/// The largest group a sentence header can describe.
pub const MAX_FRAGMENTS: u8 = 9;

type GroupKey = (Option<u8>, Option<char>);

#[derive(Debug)]
struct PartialGroup {
    count: u8,
    next: u8,
    payload: String,
    tags: TagBlock,
    opened: u64,
}

/// A complete payload, ready to de-armor.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub payload: String,
    pub fill_bits: u8,
    /// Tag blocks of the first fragment.
    pub tags: TagBlock,
}

/// Buffers fragments keyed by (sequential message id, channel).
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    groups: HashMap<GroupKey, PartialGroup>,
    opened: u64,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of incomplete groups.
    pub fn pending(&self) -> usize {
        self.groups.len()
    }

    /// Feed one sentence. Returns the full payload once its group completes.
    pub fn push(
        &mut self,
        sentence: &Sentence<'_>,
        tags: TagBlock,
    ) -> Result<Option<Assembled>, DecodeError> {
        let count = sentence.fragment_count;
        let number = sentence.fragment_number;
        let key = (sentence.sequence_id, sentence.channel);

        if count > MAX_FRAGMENTS || number > count {
            self.groups.remove(&key);
            return Err(DecodeError::Fragment(format!(
                "fragment {number} of {count}"
            )));
        }

        if count == 1 {
            return Ok(Some(Assembled {
                payload: sentence.payload.to_string(),
                fill_bits: sentence.fill_bits,
                tags,
            }));
        }

        if number == 1 {
            if self.groups.contains_key(&key) {
                debug!(?key, "discarding incomplete fragment group");
            } else if self.groups.len() >= MAX_PARTIAL_GROUPS {
                self.evict_oldest();
            }
            self.opened += 1;
            self.groups.insert(
                key,
                PartialGroup {
                    count,
                    next: 2,
                    payload: sentence.payload.to_string(),
                    tags,
                    opened: self.opened,
                },
            );
            return Ok(None);
        }

        let Some(group) = self.groups.get_mut(&key) else {
            return Err(DecodeError::Fragment(format!(
                "fragment {number} of {count} without a first fragment"
            )));
        };
        if group.count != count || group.next != number {
            let expected = (group.next, group.count);
            self.groups.remove(&key);
            return Err(DecodeError::Fragment(format!(
                "got fragment {number} of {count}, expected {} of {}",
                expected.0, expected.1
            )));
        }

        group.payload.push_str(sentence.payload);
        group.next += 1;
        if number < count {
            return Ok(None);
        }

        let Some(group) = self.groups.remove(&key) else {
            return Ok(None);
        };
        Ok(Some(Assembled {
            payload: group.payload,
            fill_bits: sentence.fill_bits,
            tags: group.tags,
        }))
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .groups
            .iter()
            .min_by_key(|(_, group)| group.opened)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            debug!(?key, "fragment buffer full, evicting oldest group");
            self.groups.remove(&key);
        }
    }
}
