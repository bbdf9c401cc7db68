//! Payload codec: batches several encoded packets into one transport frame.
//!
//! ```text
//! \u{fffd} len \u{fffd} packet \u{fffd} len \u{fffd} packet ...
//! ```
//!
//! `len` is the decimal length of the packet in UTF-16 code units, not
//! bytes and not `char`s. A payload holding exactly one packet is sent
//! unframed.

use crate::codec::decode_packet;
use crate::{Packet, ProtocolError};

/// The frame delimiter (U+FFFD REPLACEMENT CHARACTER).
pub const FRAME_DELIMITER: char = '\u{fffd}';

/// Batches encoded packets into a single frame.
///
/// Zero packets give an empty string, one packet is returned as-is.
pub fn encode_payload<S: AsRef<str>>(packets: &[S]) -> String {
    match packets {
        [] => String::new(),
        [single] => single.as_ref().to_string(),
        many => {
            let mut out = String::new();
            for packet in many {
                let packet = packet.as_ref();
                out.push(FRAME_DELIMITER);
                out.push_str(&packet.encode_utf16().count().to_string());
                out.push(FRAME_DELIMITER);
                out.push_str(packet);
            }
            out
        }
    }
}

/// Splits a frame into the encoded packets it carries, without decoding
/// them.
///
/// # Errors
/// Returns [`ProtocolError::MalformedFrame`] if a length prefix is not
/// numeric, is unterminated, or runs past the end of the input.
pub fn split_payload(raw: &str) -> Result<Vec<&str>, ProtocolError> {
    let Some(mut rest) = raw.strip_prefix(FRAME_DELIMITER) else {
        return Ok(if raw.is_empty() { Vec::new() } else { vec![raw] });
    };

    let mut packets = Vec::new();
    loop {
        let (len, after_len) =
            rest.split_once(FRAME_DELIMITER).ok_or_else(|| {
                ProtocolError::MalformedFrame(format!(
                    "unterminated length prefix {rest:?}"
                ))
            })?;
        if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::MalformedFrame(format!(
                "non-numeric length prefix {len:?}"
            )));
        }
        let units: usize = len.parse().map_err(|_| {
            ProtocolError::MalformedFrame(format!(
                "length prefix out of range {len:?}"
            ))
        })?;

        let end = utf16_offset(after_len, units).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!(
                "length {units} exceeds remaining input"
            ))
        })?;
        let (packet, remainder) = after_len.split_at(end);
        packets.push(packet);

        if remainder.is_empty() {
            return Ok(packets);
        }
        rest = remainder.strip_prefix(FRAME_DELIMITER).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!(
                "expected delimiter before {remainder:?}"
            ))
        })?;
    }
}

/// Splits and decodes a frame.
///
/// Fails on the first framing or packet error. The connection uses
/// [`split_payload`] and [`decode_packet`] separately so one bad packet
/// does not discard its neighbours.
///
/// # Errors
/// Any [`ProtocolError`] from framing or packet decoding.
pub fn decode_payload(raw: &str) -> Result<Vec<Packet>, ProtocolError> {
    split_payload(raw)?.into_iter().map(decode_packet).collect()
}

/// Byte offset in `s` after exactly `units` UTF-16 code units, or `None`
/// if `s` is too short or the boundary would split a surrogate pair.
fn utf16_offset(s: &str, units: usize) -> Option<usize> {
    let mut seen = 0;
    for (offset, c) in s.char_indices() {
        if seen == units {
            return Some(offset);
        }
        seen += c.len_utf16();
        if seen > units {
            return None;
        }
    }
    (seen == units).then_some(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_offset_counts_code_units() {
        assert_eq!(utf16_offset("abc", 2), Some(2));
        // 'ñ' is one code unit but two bytes.
        assert_eq!(utf16_offset("ñx", 1), Some(2));
        // U+1F600 is a surrogate pair: two code units, four bytes.
        assert_eq!(utf16_offset("\u{1F600}x", 2), Some(4));
        assert_eq!(utf16_offset("\u{1F600}", 1), None);
        assert_eq!(utf16_offset("ab", 3), None);
        assert_eq!(utf16_offset("", 0), Some(0));
    }

    #[test]
    fn test_split_empty_and_scalar() {
        assert!(split_payload("").unwrap().is_empty());
        assert_eq!(split_payload("2::").unwrap(), vec!["2::"]);
    }

    #[test]
    fn test_split_rejects_missing_delimiter_between_frames() {
        let raw = "\u{fffd}3\u{fffd}2::x\u{fffd}3\u{fffd}2::";
        assert!(matches!(
            split_payload(raw),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
