//! Packet types: the protocol messages that travel inside a payload.
//!
//! Every packet on the wire starts with a single-digit type code. Here the
//! packet is a closed Rust `enum` with one variant per code, so each
//! variant carries exactly the fields its type allows and `match`es over
//! packets are checked for exhaustiveness by the compiler.

use std::fmt;

use serde_json::Value;

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// The type code of a packet, without its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// `0`: detach an endpoint (or the whole connection for `""`).
    Disconnect,
    /// `1`: attach an endpoint.
    Connect,
    /// `2`: liveness check.
    Heartbeat,
    /// `3`: plain text message.
    Message,
    /// `4`: JSON message.
    Json,
    /// `5`: named event with positional arguments.
    Event,
    /// `6`: acknowledgement of an earlier packet.
    Ack,
    /// `7`: error report.
    Error,
    /// `8`: no operation, used by polling transports.
    Noop,
}

impl PacketType {
    /// Every packet type, in type-code order.
    pub const ALL: [Self; 9] = [
        Self::Disconnect,
        Self::Connect,
        Self::Heartbeat,
        Self::Message,
        Self::Json,
        Self::Event,
        Self::Ack,
        Self::Error,
        Self::Noop,
    ];

    /// The single-digit wire code.
    pub fn code(self) -> char {
        match self {
            Self::Disconnect => '0',
            Self::Connect => '1',
            Self::Heartbeat => '2',
            Self::Message => '3',
            Self::Json => '4',
            Self::Event => '5',
            Self::Ack => '6',
            Self::Error => '7',
            Self::Noop => '8',
        }
    }

    /// Looks up a packet type by its wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| {
            let mut chars = code.chars();
            chars.next() == Some(t.code()) && chars.next().is_none()
        })
    }

    /// Human-readable name (`"event"`, `"ack"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::Connect => "connect",
            Self::Heartbeat => "heartbeat",
            Self::Message => "message",
            Self::Json => "json",
            Self::Event => "event",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// AckMode
// ---------------------------------------------------------------------------

/// How the sender of a packet wants it acknowledged.
///
/// On the wire a message id with a trailing `+` (`5:1+::...`) asks for an
/// ack carrying data; a bare id on a message packet (`3:5:...`) asks for a
/// plain ack.
///
/// `Auto` is not written to the wire, only the bare id is. The decoder
/// reads a bare id as `Auto` on message packets and as no ack on every
/// other type, so `Auto` survives a round trip on messages only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Plain acknowledgement, no arguments expected back.
    Auto,
    /// Acknowledgement carrying the receiver's reply arguments.
    Data,
}

// ---------------------------------------------------------------------------
// Error reasons and advice
// ---------------------------------------------------------------------------

/// Error reasons, indexed by their wire code.
pub const ERROR_REASONS: [&str; 3] = [
    "transport not supported",
    "client not handshaken",
    "unauthorized",
];

/// Error advice, indexed by its wire code.
pub const ERROR_ADVICE: [&str; 1] = ["reconnect"];

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One protocol message.
///
/// `endpoint` is `""` for the default namespace, otherwise a `/`-prefixed
/// path. Optional fields use their default value (empty string, empty
/// list, `None`) when absent on the wire.
///
/// Encoding then decoding gives back the same packet, except for the ack
/// mode of a packet whose id has no `+`: a message with an id decodes
/// with `ack: Some(AckMode::Auto)`, and json or event packets with
/// `AckMode::Auto` decode with `ack: None`. See [`AckMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Detach `endpoint`.
    Disconnect { endpoint: String },

    /// Attach `endpoint`, optionally passing a query string (`?a=b`).
    Connect { endpoint: String, query: String },

    /// Liveness check.
    Heartbeat { endpoint: String },

    /// Plain text message.
    Message {
        endpoint: String,
        id: Option<String>,
        ack: Option<AckMode>,
        data: String,
    },

    /// JSON message. `data` is the decoded JSON value.
    Json {
        endpoint: String,
        id: Option<String>,
        ack: Option<AckMode>,
        data: Value,
    },

    /// Named event with positional arguments.
    Event {
        endpoint: String,
        id: Option<String>,
        ack: Option<AckMode>,
        name: String,
        args: Vec<Value>,
    },

    /// Acknowledgement of the packet whose id was `ack_id`.
    Ack {
        endpoint: String,
        ack_id: String,
        args: Vec<Value>,
    },

    /// Error report. `reason` and `advice` are empty when absent.
    Error {
        endpoint: String,
        reason: String,
        advice: String,
    },

    /// No operation.
    Noop { endpoint: String },
}

impl Packet {
    /// A disconnect packet for `endpoint`.
    pub fn disconnect(endpoint: impl Into<String>) -> Self {
        Self::Disconnect {
            endpoint: endpoint.into(),
        }
    }

    /// A connect packet for `endpoint` without a query string.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            query: String::new(),
        }
    }

    /// A heartbeat packet for `endpoint`.
    pub fn heartbeat(endpoint: impl Into<String>) -> Self {
        Self::Heartbeat {
            endpoint: endpoint.into(),
        }
    }

    /// A text message without an id.
    pub fn message(endpoint: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Message {
            endpoint: endpoint.into(),
            id: None,
            ack: None,
            data: data.into(),
        }
    }

    /// A JSON message without an id.
    pub fn json(endpoint: impl Into<String>, data: Value) -> Self {
        Self::Json {
            endpoint: endpoint.into(),
            id: None,
            ack: None,
            data,
        }
    }

    /// An event without an id.
    pub fn event(
        endpoint: impl Into<String>,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self::Event {
            endpoint: endpoint.into(),
            id: None,
            ack: None,
            name: name.into(),
            args,
        }
    }

    /// An acknowledgement of `ack_id`.
    pub fn ack(
        endpoint: impl Into<String>,
        ack_id: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self::Ack {
            endpoint: endpoint.into(),
            ack_id: ack_id.into(),
            args,
        }
    }

    /// An error report.
    pub fn error(
        endpoint: impl Into<String>,
        reason: impl Into<String>,
        advice: impl Into<String>,
    ) -> Self {
        Self::Error {
            endpoint: endpoint.into(),
            reason: reason.into(),
            advice: advice.into(),
        }
    }

    /// The packet's type code.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Disconnect { .. } => PacketType::Disconnect,
            Self::Connect { .. } => PacketType::Connect,
            Self::Heartbeat { .. } => PacketType::Heartbeat,
            Self::Message { .. } => PacketType::Message,
            Self::Json { .. } => PacketType::Json,
            Self::Event { .. } => PacketType::Event,
            Self::Ack { .. } => PacketType::Ack,
            Self::Error { .. } => PacketType::Error,
            Self::Noop { .. } => PacketType::Noop,
        }
    }

    /// The endpoint this packet is addressed to.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Disconnect { endpoint }
            | Self::Connect { endpoint, .. }
            | Self::Heartbeat { endpoint }
            | Self::Message { endpoint, .. }
            | Self::Json { endpoint, .. }
            | Self::Event { endpoint, .. }
            | Self::Ack { endpoint, .. }
            | Self::Error { endpoint, .. }
            | Self::Noop { endpoint } => endpoint,
        }
    }

    /// Readdresses the packet to `new_endpoint`.
    pub fn set_endpoint(&mut self, new_endpoint: impl Into<String>) {
        let new_endpoint = new_endpoint.into();
        match self {
            Self::Disconnect { endpoint }
            | Self::Connect { endpoint, .. }
            | Self::Heartbeat { endpoint }
            | Self::Message { endpoint, .. }
            | Self::Json { endpoint, .. }
            | Self::Event { endpoint, .. }
            | Self::Ack { endpoint, .. }
            | Self::Error { endpoint, .. }
            | Self::Noop { endpoint } => *endpoint = new_endpoint,
        }
    }

    /// The message id and ack mode, for the packet types that carry one.
    pub fn message_id(&self) -> Option<(&str, Option<AckMode>)> {
        match self {
            Self::Message { id, ack, .. }
            | Self::Json { id, ack, .. }
            | Self::Event { id, ack, .. } => {
                id.as_deref().map(|id| (id, *ack))
            }
            _ => None,
        }
    }

    /// Attaches a message id and ack mode.
    ///
    /// Returns `false` (and leaves the packet untouched) for packet types
    /// that cannot carry an id. `AckMode::Auto` on json and event packets
    /// only affects how this side treats the reply; the peer sees a bare
    /// id.
    pub fn set_message_id(
        &mut self,
        new_id: impl Into<String>,
        mode: AckMode,
    ) -> bool {
        match self {
            Self::Message { id, ack, .. }
            | Self::Json { id, ack, .. }
            | Self::Event { id, ack, .. } => {
                *id = Some(new_id.into());
                *ack = Some(mode);
                true
            }
            _ => false,
        }
    }
}

/// Maps an error reason to its wire index, if it is a known reason.
pub(crate) fn reason_index(reason: &str) -> Option<usize> {
    ERROR_REASONS.iter().position(|r| *r == reason)
}

/// Maps error advice to its wire index, if it is known advice.
pub(crate) fn advice_index(advice: &str) -> Option<usize> {
    ERROR_ADVICE.iter().position(|a| *a == advice)
}
