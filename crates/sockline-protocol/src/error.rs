//! Error types for the protocol layer.
//!
//! Each crate in sockline defines its own error enum. A `ProtocolError`
//! always means the problem is in the text itself (a corrupt frame, an
//! unknown packet type, a bad handshake record), never in networking.

/// Errors that can occur while encoding or decoding the wire format.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The packet type code is not one of the known single-digit codes.
    ///
    /// Inbound packets with an unknown type are dropped by the connection;
    /// the rest of the payload is still processed.
    #[error("unknown packet type: {0:?}")]
    UnknownPacketType(String),

    /// The packet is missing its field separators or carries a
    /// non-numeric message id.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A payload length prefix is corrupt or longer than the input.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The handshake record could not be parsed.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    /// Serializing a JSON-bearing packet tail failed.
    ///
    /// The inner `serde_json::Error` is kept so callers can inspect the
    /// original cause.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
