//! Error types for the session layer.

use crate::ConnectionState;

/// Errors raised by session bookkeeping and option validation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A state change the lifecycle does not allow, for example
    /// `Disconnected → Connected` without passing through `Connecting`.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The options name no transport at all.
    #[error("no transports configured")]
    NoTransports,

    /// A transport name that no registered factory provides.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    /// An option value outside its allowed range.
    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}
