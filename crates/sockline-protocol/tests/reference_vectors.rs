//! Reference vectors for the packet and payload codecs.
//!
//! Each decode vector is paired with the encode direction where the wire
//! form is canonical. Vectors where encoding normalizes the input (for
//! example `7:::` encodes back to `7::`) are called out explicitly.

use serde_json::{json, Value};
use sockline_protocol::{
    decode_packet, decode_payload, encode_packet, encode_payload,
    split_payload, AckMode, Packet, ProtocolError, FRAME_DELIMITER,
};

// =========================================================================
// Helpers
// =========================================================================

fn decode(raw: &str) -> Packet {
    decode_packet(raw).expect("vector should decode")
}

fn encode(packet: &Packet) -> String {
    encode_packet(packet).expect("vector should encode")
}

fn with_id(mut packet: Packet, id: &str, mode: AckMode) -> Packet {
    assert!(packet.set_message_id(id, mode));
    packet
}

// =========================================================================
// error (7)
// =========================================================================

#[test]
fn test_decode_error_packet() {
    assert_eq!(decode("7:::"), Packet::error("", "", ""));
}

#[test]
fn test_decode_error_packet_with_reason() {
    assert_eq!(
        decode("7:::0"),
        Packet::error("", "transport not supported", "")
    );
}

#[test]
fn test_decode_error_packet_with_reason_and_advice() {
    assert_eq!(
        decode("7:::2+0"),
        Packet::error("", "unauthorized", "reconnect")
    );
}

#[test]
fn test_decode_error_packet_with_endpoint() {
    assert_eq!(decode("7::/woot"), Packet::error("/woot", "", ""));
}

#[test]
fn test_encode_error_packets() {
    assert_eq!(encode(&Packet::error("", "", "")), "7::");
    assert_eq!(
        encode(&Packet::error("", "transport not supported", "")),
        "7:::0"
    );
    assert_eq!(
        encode(&Packet::error("", "unauthorized", "reconnect")),
        "7:::2+0"
    );
    assert_eq!(encode(&Packet::error("/woot", "", "")), "7::/woot");
}

// =========================================================================
// ack (6)
// =========================================================================

#[test]
fn test_decode_ack_packet() {
    assert_eq!(decode("6:::140"), Packet::ack("", "140", vec![]));
}

#[test]
fn test_decode_ack_packet_with_args() {
    assert_eq!(
        decode(r#"6:::12+["woot","wa"]"#),
        Packet::ack("", "12", vec![json!("woot"), json!("wa")])
    );
}

#[test]
fn test_decode_ack_packet_with_bad_json_does_not_fail() {
    assert_eq!(decode(r#"6:::1+{"++]"#), Packet::ack("", "1", vec![]));
}

#[test]
fn test_encode_ack_packets() {
    assert_eq!(encode(&Packet::ack("", "140", vec![])), "6:::140");
    assert_eq!(
        encode(&Packet::ack("", "12", vec![json!("woot"), json!("wa")])),
        r#"6:::12+["woot","wa"]"#
    );
}

// =========================================================================
// json (4)
// =========================================================================

#[test]
fn test_decode_json_packet() {
    assert_eq!(decode(r#"4:::"2""#), Packet::json("", json!("2")));
}

#[test]
fn test_decode_json_packet_with_message_id_and_ack_data() {
    assert_eq!(
        decode(r#"4:1+::{"a":"b"}"#),
        with_id(Packet::json("", json!({"a": "b"})), "1", AckMode::Data)
    );
}

#[test]
fn test_decode_json_packet_with_bad_json_degrades_to_empty_data() {
    assert_eq!(
        decode("4:::{nope"),
        Packet::json("", Value::String(String::new()))
    );
}

#[test]
fn test_encode_json_packets() {
    assert_eq!(encode(&Packet::json("", json!("2"))), r#"4:::"2""#);
    assert_eq!(
        encode(&with_id(
            Packet::json("", json!({"a": "b"})),
            "1",
            AckMode::Data
        )),
        r#"4:1+::{"a":"b"}"#
    );
}

// =========================================================================
// event (5)
// =========================================================================

#[test]
fn test_decode_event_packet() {
    assert_eq!(
        decode(r#"5:::{"name":"woot"}"#),
        Packet::event("", "woot", vec![])
    );
}

#[test]
fn test_decode_event_packet_with_message_id_and_ack() {
    assert_eq!(
        decode(r#"5:1+::{"name":"tobi"}"#),
        with_id(Packet::event("", "tobi", vec![]), "1", AckMode::Data)
    );
}

#[test]
fn test_decode_event_packet_with_data() {
    assert_eq!(
        decode(r#"5:::{"name":"edwald","args":[{"a": "b"},2,"3"]}"#),
        Packet::event("", "edwald", vec![json!({"a": "b"}), json!(2), json!("3")])
    );
}

#[test]
fn test_decode_event_packet_with_bad_json_degrades_to_empty_args() {
    assert_eq!(decode("5:::{[}"), Packet::event("", "", vec![]));
}

#[test]
fn test_encode_event_packets() {
    assert_eq!(
        encode(&Packet::event("", "woot", vec![])),
        r#"5:::{"name":"woot"}"#
    );
    assert_eq!(
        encode(&with_id(Packet::event("", "tobi", vec![]), "1", AckMode::Data)),
        r#"5:1+::{"name":"tobi"}"#
    );
    assert_eq!(
        encode(&Packet::event(
            "",
            "edwald",
            vec![json!({"a": "b"}), json!(2), json!("3")]
        )),
        r#"5:::{"name":"edwald","args":[{"a":"b"},2,"3"]}"#
    );
}

// =========================================================================
// message (3)
// =========================================================================

#[test]
fn test_decode_message_packet() {
    assert_eq!(decode("3:::woot"), Packet::message("", "woot"));
}

#[test]
fn test_decode_message_packet_with_id_and_endpoint() {
    assert_eq!(
        decode("3:5:/tobi"),
        with_id(Packet::message("/tobi", ""), "5", AckMode::Auto)
    );
}

#[test]
fn test_decode_message_keeps_colons_newlines_and_unicode() {
    assert_eq!(decode("3:::\n"), Packet::message("", "\n"));
    assert_eq!(decode("3:::a:b:c"), Packet::message("", "a:b:c"));
    assert_eq!(decode("3:::ñ ☃"), Packet::message("", "ñ ☃"));
}

#[test]
fn test_encode_message_packets() {
    assert_eq!(encode(&Packet::message("", "woot")), "3:::woot");
    assert_eq!(
        encode(&with_id(Packet::message("/tobi", ""), "5", AckMode::Auto)),
        "3:5:/tobi"
    );
}

#[test]
fn test_bare_id_only_implies_ack_on_message_packets() {
    let event = decode(r#"5:7::{"name":"x"}"#);
    assert_eq!(event.message_id(), Some(("7", None)));
}

// =========================================================================
// heartbeat (2), connect (1), disconnect (0), noop (8)
// =========================================================================

#[test]
fn test_heartbeat_packet() {
    assert_eq!(decode("2:::"), Packet::heartbeat(""));
    assert_eq!(encode(&Packet::heartbeat("")), "2::");
}

#[test]
fn test_connect_packet() {
    assert_eq!(decode("1::/tobi"), Packet::connect("/tobi"));
    assert_eq!(encode(&Packet::connect("/tobi")), "1::/tobi");
}

#[test]
fn test_connect_packet_with_query_string() {
    let packet = Packet::Connect {
        endpoint: "/test".into(),
        query: "?test=1".into(),
    };
    assert_eq!(decode("1::/test:?test=1"), packet);
    assert_eq!(encode(&packet), "1::/test:?test=1");
}

#[test]
fn test_disconnect_packet() {
    assert_eq!(decode("0::/woot"), Packet::disconnect("/woot"));
    assert_eq!(encode(&Packet::disconnect("/woot")), "0::/woot");
}

#[test]
fn test_noop_packet() {
    assert_eq!(
        decode("8::"),
        Packet::Noop {
            endpoint: String::new()
        }
    );
}

// =========================================================================
// malformed packets
// =========================================================================

#[test]
fn test_decode_unknown_type_is_an_error() {
    assert!(matches!(
        decode_packet("9:::"),
        Err(ProtocolError::UnknownPacketType(t)) if t == "9"
    ));
    assert!(matches!(
        decode_packet("garbage"),
        Err(ProtocolError::UnknownPacketType(_))
    ));
}

#[test]
fn test_decode_missing_separators_is_an_error() {
    assert!(matches!(
        decode_packet("3:"),
        Err(ProtocolError::MalformedPacket(_))
    ));
    assert!(matches!(
        decode_packet("3:x:"),
        Err(ProtocolError::MalformedPacket(_))
    ));
}

// =========================================================================
// round trips
// =========================================================================

#[test]
fn test_round_trip_preserves_every_variant() {
    let packets = vec![
        Packet::disconnect("/a"),
        Packet::Connect {
            endpoint: "/a".into(),
            query: "?x=1".into(),
        },
        Packet::heartbeat(""),
        with_id(Packet::message("/a", "hi:there\n"), "3", AckMode::Auto),
        with_id(Packet::json("", json!({"z": 1, "a": [true]})), "4", AckMode::Data),
        with_id(
            Packet::event("/b", "move", vec![json!(1), json!({"k": "v"})]),
            "9",
            AckMode::Data,
        ),
        Packet::ack("/b", "9", vec![json!("ok")]),
        Packet::error("/b", "unauthorized", "reconnect"),
        Packet::error("", "client not handshaken", ""),
    ];
    for packet in packets {
        assert_eq!(decode(&encode(&packet)), packet, "round trip of {packet:?}");
    }
}

#[test]
fn test_round_trip_normalizes_bare_id_ack_mode() {
    let json = with_id(Packet::json("", json!(1)), "4", AckMode::Auto);
    assert_eq!(encode(&json), "4:4::1");
    assert_eq!(
        decode("4:4::1"),
        Packet::Json {
            endpoint: String::new(),
            id: Some("4".into()),
            ack: None,
            data: json!(1),
        }
    );

    let message = Packet::Message {
        endpoint: String::new(),
        id: Some("5".into()),
        ack: None,
        data: "x".into(),
    };
    assert_eq!(encode(&message), "3:5::x");
    assert_eq!(
        decode("3:5::x"),
        with_id(Packet::message("", "x"), "5", AckMode::Auto)
    );
}

// =========================================================================
// payloads
// =========================================================================

#[test]
fn test_decode_payload_reference_vector() {
    let raw = "\u{fffd}5\u{fffd}3:::5\u{fffd}7\u{fffd}3:::53d\u{fffd}3\u{fffd}0::";
    assert_eq!(
        decode_payload(raw).unwrap(),
        vec![
            Packet::message("", "5"),
            Packet::message("", "53d"),
            Packet::disconnect(""),
        ]
    );
}

#[test]
fn test_encode_payload_reference_vector() {
    let packets = [
        encode(&Packet::message("", "5")),
        encode(&Packet::message("", "53d")),
    ];
    assert_eq!(
        encode_payload(&packets),
        "\u{fffd}5\u{fffd}3:::5\u{fffd}7\u{fffd}3:::53d"
    );
}

#[test]
fn test_payload_round_trips_for_zero_one_and_many() {
    let empty: [String; 0] = [];
    assert_eq!(encode_payload(&empty), "");
    assert!(decode_payload("").unwrap().is_empty());

    let one = [encode(&Packet::message("/x", "solo"))];
    let scalar = encode_payload(&one);
    assert!(!scalar.contains(FRAME_DELIMITER));
    assert_eq!(scalar, "3::/x:solo");
    assert_eq!(decode_payload(&scalar).unwrap(), vec![Packet::message("/x", "solo")]);

    let many: Vec<Packet> = (0..4).map(|_| Packet::message("/woot", "ñ")).collect();
    let encoded: Vec<String> = many.iter().map(encode).collect();
    assert_eq!(decode_payload(&encode_payload(&encoded)).unwrap(), many);
}

#[test]
fn test_payload_lengths_count_utf16_code_units() {
    let packets = ["3:::\u{1F600}".to_string(), "3:::é".to_string()];
    let raw = encode_payload(&packets);
    assert!(raw.starts_with("\u{fffd}6\u{fffd}"));
    assert_eq!(split_payload(&raw).unwrap(), vec!["3:::\u{1F600}", "3:::é"]);
}

#[test]
fn test_decode_payload_framing_errors() {
    assert!(matches!(
        split_payload("\u{fffd}x\u{fffd}2::"),
        Err(ProtocolError::MalformedFrame(_))
    ));
    assert!(matches!(
        split_payload("\u{fffd}10\u{fffd}2::"),
        Err(ProtocolError::MalformedFrame(_))
    ));
    assert!(matches!(
        split_payload("\u{fffd}3"),
        Err(ProtocolError::MalformedFrame(_))
    ));
}
