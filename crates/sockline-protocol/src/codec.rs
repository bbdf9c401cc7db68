//! Packet codec: converts a [`Packet`] to and from its wire string.
//!
//! The wire form of a packet is
//!
//! ```text
//! type ":" [id ["+"]] ":" endpoint [":" data]
//! ```
//!
//! where `data` is type specific and may itself contain `:`. Decoding
//! splits on at most three separators so the tail is left intact.
//!
//! Decoding never fails because of a bad JSON tail. A json packet whose
//! body does not parse decodes with empty data, an event or ack with empty
//! args. Only an unknown type code or a missing separator is an error.

use serde::Serialize;
use serde_json::Value;

use crate::packet::{
    advice_index, reason_index, AckMode, Packet, PacketType, ERROR_ADVICE,
    ERROR_REASONS,
};
use crate::ProtocolError;

/// The JSON body of an event packet.
///
/// A struct (rather than `json!`) pins the field order to `name, args`.
#[derive(Serialize)]
struct EventBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    args: &'a [Value],
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes a packet into its wire string.
///
/// Empty optional fields are omitted, so `decode_packet(encode_packet(p))`
/// equals `p` up to default values.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if a JSON tail cannot be serialized.
pub fn encode_packet(packet: &Packet) -> Result<String, ProtocolError> {
    let mut out = String::new();
    out.push(packet.packet_type().code());
    out.push(':');

    if let Some((id, ack)) = packet.message_id() {
        out.push_str(id);
        if ack == Some(AckMode::Data) {
            out.push('+');
        }
    }

    out.push(':');
    out.push_str(packet.endpoint());

    let tail = match packet {
        Packet::Connect { query, .. } if !query.is_empty() => {
            Some(query.clone())
        }
        Packet::Message { data, .. } if !data.is_empty() => Some(data.clone()),
        Packet::Json { data, .. } => Some(serde_json::to_string(data)?),
        Packet::Event { name, args, .. } => {
            Some(serde_json::to_string(&EventBody { name, args })?)
        }
        Packet::Ack { ack_id, args, .. } => {
            let mut tail = ack_id.clone();
            if !args.is_empty() {
                tail.push('+');
                tail.push_str(&serde_json::to_string(args)?);
            }
            Some(tail)
        }
        Packet::Error { reason, advice, .. } => {
            encode_error_tail(reason, advice)
        }
        _ => None,
    };

    if let Some(tail) = tail {
        out.push(':');
        out.push_str(&tail);
    }

    Ok(out)
}

/// `reason["+"advice]`, with known strings replaced by their index.
fn encode_error_tail(reason: &str, advice: &str) -> Option<String> {
    if reason.is_empty() && advice.is_empty() {
        return None;
    }
    let mut tail = match reason_index(reason) {
        Some(i) => i.to_string(),
        None => reason.to_string(),
    };
    if !advice.is_empty() {
        tail.push('+');
        match advice_index(advice) {
            Some(i) => tail.push_str(&i.to_string()),
            None => tail.push_str(advice),
        }
    }
    Some(tail)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes one packet from its wire string.
///
/// Character data is preserved exactly, including newlines and non-ASCII
/// text.
///
/// # Errors
/// - [`ProtocolError::UnknownPacketType`] for a type code outside `0..=8`.
/// - [`ProtocolError::MalformedPacket`] when the id/endpoint separators are
///   missing or the message id is not numeric.
pub fn decode_packet(raw: &str) -> Result<Packet, ProtocolError> {
    // `splitn(4, ':')` yields at most four pieces; the fourth keeps any
    // further `:` characters untouched.
    let mut fields = raw.splitn(4, ':');

    let code = fields.next().unwrap_or_default();
    let packet_type = PacketType::from_code(code)
        .ok_or_else(|| ProtocolError::UnknownPacketType(code.to_string()))?;

    let id_field = fields.next().ok_or_else(|| {
        ProtocolError::MalformedPacket(format!("missing id field in {raw:?}"))
    })?;
    let endpoint = fields
        .next()
        .ok_or_else(|| {
            ProtocolError::MalformedPacket(format!(
                "missing endpoint field in {raw:?}"
            ))
        })?
        .to_string();
    let data = fields.next().unwrap_or_default();

    let (id, data_ack) = parse_id_field(id_field)?;

    // A bare id means "ack me" only on message packets. Every other type
    // needs the explicit `+` marker to request an ack.
    let ack = match (&id, data_ack) {
        (None, _) => None,
        (Some(_), true) => Some(AckMode::Data),
        (Some(_), false) if packet_type == PacketType::Message => {
            Some(AckMode::Auto)
        }
        (Some(_), false) => None,
    };

    let packet = match packet_type {
        PacketType::Disconnect => Packet::Disconnect { endpoint },
        PacketType::Connect => Packet::Connect {
            endpoint,
            query: data.to_string(),
        },
        PacketType::Heartbeat => Packet::Heartbeat { endpoint },
        PacketType::Noop => Packet::Noop { endpoint },
        PacketType::Message => Packet::Message {
            endpoint,
            id,
            ack,
            data: data.to_string(),
        },
        PacketType::Json => Packet::Json {
            endpoint,
            id,
            ack,
            data: serde_json::from_str(data)
                .unwrap_or_else(|_| Value::String(String::new())),
        },
        PacketType::Event => {
            let (name, args) = decode_event_body(data);
            Packet::Event {
                endpoint,
                id,
                ack,
                name,
                args,
            }
        }
        PacketType::Ack => {
            let (ack_id, args) = decode_ack_body(data);
            Packet::Ack {
                endpoint,
                ack_id,
                args,
            }
        }
        PacketType::Error => {
            let (reason, advice) = decode_error_body(data);
            Packet::Error {
                endpoint,
                reason,
                advice,
            }
        }
    };

    Ok(packet)
}

/// Parses `[digits]["+"]` into the id and the data-ack flag.
fn parse_id_field(
    field: &str,
) -> Result<(Option<String>, bool), ProtocolError> {
    let (digits, data_ack) = match field.strip_suffix('+') {
        Some(digits) => (digits, true),
        None => (field, false),
    };
    if digits.is_empty() {
        return Ok((None, false));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedPacket(format!(
            "non-numeric message id {field:?}"
        )));
    }
    Ok((Some(digits.to_string()), data_ack))
}

/// Extracts `name` and `args` from an event body, leniently.
fn decode_event_body(data: &str) -> (String, Vec<Value>) {
    let Ok(Value::Object(mut body)) = serde_json::from_str::<Value>(data)
    else {
        return (String::new(), Vec::new());
    };
    let name = match body.remove("name") {
        Some(Value::String(name)) => name,
        _ => String::new(),
    };
    let args = match body.remove("args") {
        Some(Value::Array(args)) => args,
        _ => Vec::new(),
    };
    (name, args)
}

/// Splits `ackId["+"json-array]`.
fn decode_ack_body(data: &str) -> (String, Vec<Value>) {
    let digits_len = data.bytes().take_while(u8::is_ascii_digit).count();
    let (ack_id, rest) = data.split_at(digits_len);
    let rest = rest.strip_prefix('+').unwrap_or(rest);
    let args = if rest.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str::<Vec<Value>>(rest).unwrap_or_default()
    };
    (ack_id.to_string(), args)
}

/// Splits `reason["+"advice]` and maps wire indices back to strings.
fn decode_error_body(data: &str) -> (String, String) {
    let (reason, advice) = data.split_once('+').unwrap_or((data, ""));
    (
        lookup_indexed(reason, &ERROR_REASONS),
        lookup_indexed(advice, &ERROR_ADVICE),
    )
}

/// A numeric field is an index into `table` (unknown indices decode to
/// `""`); anything else is kept verbatim.
fn lookup_indexed(field: &str, table: &[&str]) -> String {
    if field.is_empty() {
        return String::new();
    }
    match field.parse::<usize>() {
        Ok(i) => table.get(i).map(|s| (*s).to_string()).unwrap_or_default(),
        Err(_) => field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_id_field_variants() {
        assert_eq!(parse_id_field("").unwrap(), (None, false));
        assert_eq!(parse_id_field("12").unwrap(), (Some("12".into()), false));
        assert_eq!(parse_id_field("12+").unwrap(), (Some("12".into()), true));
        assert!(parse_id_field("1a").is_err());
    }

    #[test]
    fn test_decode_ack_body_without_digits_keeps_empty_id() {
        assert_eq!(decode_ack_body(""), (String::new(), Vec::new()));
        assert_eq!(
            decode_ack_body("7+[1]"),
            ("7".to_string(), vec![json!(1)])
        );
    }

    #[test]
    fn test_event_body_with_non_array_args_degrades() {
        let (name, args) = decode_event_body(r#"{"name":"x","args":3}"#);
        assert_eq!(name, "x");
        assert!(args.is_empty());
    }

    #[test]
    fn test_error_tail_with_unknown_reason_is_verbatim() {
        assert_eq!(
            encode_error_tail("boom", ""),
            Some("boom".to_string())
        );
        assert_eq!(lookup_indexed("boom", &ERROR_REASONS), "boom");
        assert_eq!(lookup_indexed("9", &ERROR_REASONS), "");
    }

    #[test]
    fn test_error_tail_with_only_advice() {
        assert_eq!(encode_error_tail("", "reconnect"), Some("+0".to_string()));
    }
}
