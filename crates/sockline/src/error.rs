//! Unified error type for sockline.

use sockline_protocol::ProtocolError;
use sockline_session::SessionError;
use sockline_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `sockline` meta-crate you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attributes let `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (open, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, handshake).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (options, state machine).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The server URL could not be parsed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The handshake did not arrive within the connect timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The connection task has stopped; the handle can no longer be used.
    #[error("connection is closed")]
    ConnectionClosed,
}

/// Shorthand for `Result<T, sockline::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
