//! Sentence envelope: tag blocks, checksum and the comma-separated fields.

use crate::error::DecodeError;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Parameters carried by `\...\` tag blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagBlock {
    /// `c:` receiver timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// `s:` source station.
    pub source: Option<String>,
}

impl TagBlock {
    fn absorb(&mut self, block: &str) -> Result<(), DecodeError> {
        let params = match block.rsplit_once('*') {
            Some((params, sum)) => {
                verify(params, sum)?;
                params
            }
            None => block,
        };
        for param in params.split(',') {
            let Some((key, value)) = param.split_once(':') else {
                continue;
            };
            match key {
                "c" => self.timestamp = parse_unix_time(value),
                "s" => self.source = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Some receivers write milliseconds instead of seconds.
fn parse_unix_time(value: &str) -> Option<DateTime<Utc>> {
    let raw: i64 = value.parse().ok()?;
    if raw > 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// XOR of every byte, as used by NMEA 0183 checksums.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

fn verify(body: &str, sum: &str) -> Result<(), DecodeError> {
    let expected = u8::from_str_radix(sum.trim(), 16)
        .map_err(|_| DecodeError::Malformed(format!("bad checksum field {sum:?}")))?;
    let computed = checksum(body);
    if expected != computed {
        return Err(DecodeError::Checksum { expected, computed });
    }
    Ok(())
}

/// Remove every `\...\` tag block from `line`, collecting its parameters.
pub fn strip_tag_blocks(line: &str) -> Result<(TagBlock, Cow<'_, str>), DecodeError> {
    let mut tags = TagBlock::default();
    if !line.contains('\\') {
        return Ok((tags, Cow::Borrowed(line)));
    }

    let mut sentence = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('\\') {
        sentence.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('\\')
            .ok_or_else(|| DecodeError::Malformed("unterminated tag block".into()))?;
        tags.absorb(&after[..close])?;
        rest = &after[close + 1..];
    }
    sentence.push_str(rest);
    Ok((tags, Cow::Owned(sentence)))
}

fn envelope() -> &'static Regex {
    static ENVELOPE: OnceLock<Regex> = OnceLock::new();
    ENVELOPE.get_or_init(|| {
        Regex::new(
            r"^[!$](?P<talker>[A-Z]{2})VD[MO],(?P<count>\d),(?P<number>\d),(?P<seq>\d?),(?P<channel>[AB12]?),(?P<payload>[0-W`-w]*),(?P<fill>[0-5])$",
        )
        .expect("envelope pattern is valid")
    })
}

/// One AIVDM/AIVDO sentence, checksum verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence<'a> {
    pub talker: &'a str,
    pub fragment_count: u8,
    pub fragment_number: u8,
    pub sequence_id: Option<u8>,
    pub channel: Option<char>,
    pub payload: &'a str,
    pub fill_bits: u8,
}

impl<'a> Sentence<'a> {
    /// Parse a sentence with its tag blocks already stripped.
    pub fn parse(line: &'a str) -> Result<Self, DecodeError> {
        let line = line.trim();
        let Some(start) = line.find(['!', '$']) else {
            return Err(DecodeError::Malformed(truncate(line)));
        };
        let line = &line[start..];
        let (body, sum) = line
            .rsplit_once('*')
            .ok_or_else(|| DecodeError::Malformed("missing checksum".into()))?;
        verify(&body[1..], sum)?;

        let caps = envelope()
            .captures(body)
            .ok_or_else(|| DecodeError::Malformed(truncate(body)))?;
        let digit = |name: &str| -> u8 {
            caps.name(name)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let sequence_id = caps
            .name("seq")
            .filter(|m| !m.as_str().is_empty())
            .and_then(|m| m.as_str().parse().ok());
        let channel = caps.name("channel").and_then(|m| m.as_str().chars().next());

        let sentence = Sentence {
            talker: caps.name("talker").map_or("", |m| m.as_str()),
            fragment_count: digit("count"),
            fragment_number: digit("number"),
            sequence_id,
            channel,
            payload: caps.name("payload").map_or("", |m| m.as_str()),
            fill_bits: digit("fill"),
        };
        if sentence.fragment_count == 0 || sentence.fragment_number == 0 {
            return Err(DecodeError::Fragment(format!(
                "fragment {} of {}",
                sentence.fragment_number, sentence.fragment_count
            )));
        }
        Ok(sentence)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(82).collect()
}
