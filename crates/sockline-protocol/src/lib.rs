//! Wire protocol for sockline.
//!
//! This crate defines the text format that clients and servers speak:
//!
//! - **Packets** ([`Packet`], [`PacketType`], [`AckMode`]): the typed
//!   protocol messages.
//! - **Packet codec** ([`encode_packet`], [`decode_packet`]): one packet
//!   to/from its `type:id:endpoint:data` string.
//! - **Payload codec** ([`encode_payload`], [`decode_payload`],
//!   [`split_payload`]): several packets batched into one transport frame.
//! - **Handshake** ([`Handshake`]): the session record sent when a
//!   transport opens.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer is pure: no I/O, no state. It sits between the
//! transport (which moves frames) and the connection (which owns the
//! session).
//!
//! ```text
//! Transport (frames) → Protocol (Packets) → Connection (session, namespaces)
//! ```

mod codec;
mod error;
mod handshake;
mod packet;
mod payload;

pub use codec::{decode_packet, encode_packet};
pub use error::ProtocolError;
pub use handshake::Handshake;
pub use packet::{AckMode, ERROR_ADVICE, ERROR_REASONS, Packet, PacketType};
pub use payload::{FRAME_DELIMITER, decode_payload, encode_payload, split_payload};

/// Protocol revision spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;
