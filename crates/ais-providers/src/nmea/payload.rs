//! Six-bit armored payloads.

use crate::error::DecodeError;

const SIXBIT_TEXT: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/// De-armored payload, one six-bit symbol per byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    symbols: Vec<u8>,
    bits: usize,
}

impl Payload {
    /// De-armor `armored`, dropping `fill_bits` padding bits from the end.
    pub fn from_armored(armored: &str, fill_bits: u8) -> Result<Self, DecodeError> {
        let symbols = armored
            .chars()
            .map(|c| match c {
                '0'..='W' => Ok(c as u8 - 48),
                '`'..='w' => Ok(c as u8 - 56),
                _ => Err(DecodeError::Armor(c)),
            })
            .collect::<Result<Vec<u8>, _>>()?;
        let bits = (symbols.len() * 6).saturating_sub(fill_bits as usize);
        Ok(Self { symbols, bits })
    }

    /// Number of meaningful bits.
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    fn bit(&self, index: usize) -> u64 {
        let symbol = self.symbols[index / 6];
        u64::from((symbol >> (5 - index % 6)) & 1)
    }

    /// Unsigned field of `width` bits starting at `start`.
    ///
    /// Bits past the end read as zero; callers check `len()` first.
    pub fn uint(&self, start: usize, width: usize) -> u64 {
        (start..start + width).fold(0, |acc, i| {
            let bit = if i < self.bits { self.bit(i) } else { 0 };
            (acc << 1) | bit
        })
    }

    /// Two's-complement signed field.
    pub fn int(&self, start: usize, width: usize) -> i64 {
        let raw = self.uint(start, width);
        let shift = 64 - width as u32;
        ((raw << shift) as i64) >> shift
    }

    /// Six-bit text of up to `chars` characters.
    ///
    /// Stops at the first `@`, trims surrounding spaces and truncates to the
    /// characters actually present. Empty text is `None`.
    pub fn text(&self, start: usize, chars: usize) -> Option<String> {
        let available = self.bits.saturating_sub(start) / 6;
        let text: String = (0..chars.min(available))
            .map(|i| SIXBIT_TEXT[self.uint(start + i * 6, 6) as usize] as char)
            .take_while(|&c| c != '@')
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_armor() {
        let p = Payload::from_armored("0Ww`", 0).unwrap();
        assert_eq!(p.len(), 24);
        assert_eq!(p.uint(0, 6), 0);
        assert_eq!(p.uint(6, 6), 39);
        assert_eq!(p.uint(12, 6), 63);
        assert_eq!(p.uint(18, 6), 40);
    }

    #[test]
    fn test_fill_bits() {
        let p = Payload::from_armored("00", 2).unwrap();
        assert_eq!(p.len(), 10);
    }

    #[test]
    fn test_rejects_out_of_range_symbol() {
        assert!(matches!(
            Payload::from_armored("0X", 0),
            Err(DecodeError::Armor('X'))
        ));
    }

    #[test]
    fn test_signed_fields() {
        // 111111 = -1 in six bits
        let p = Payload::from_armored("w", 0).unwrap();
        assert_eq!(p.int(0, 6), -1);
        assert_eq!(p.uint(0, 6), 63);
        assert_eq!(p.int(1, 5), -1);
        let p = Payload::from_armored("O", 0).unwrap(); // 011111
        assert_eq!(p.int(0, 6), 31);
    }

    #[test]
    fn test_text_trims_padding() {
        // "AB@@H": everything after the first "@" is padding
        let p = Payload::from_armored("12008", 0).unwrap();
        assert_eq!(p.text(0, 5), Some("AB".to_string()));
        let p = Payload::from_armored("0000", 0).unwrap();
        assert_eq!(p.text(0, 4), None);
        let p = Payload::from_armored("PP1P", 0).unwrap();
        assert_eq!(p.text(0, 4), Some("A".to_string()));
    }

    #[test]
    fn test_text_truncated_payload() {
        let p = Payload::from_armored("12", 0).unwrap();
        assert_eq!(p.text(0, 20), Some("AB".to_string()));
    }
}
